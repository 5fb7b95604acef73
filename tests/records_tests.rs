#[cfg(test)]
mod records_tests {
    use semcrawl::records::{EmbeddingRecord, PageRecord, WarcJob};
    use serde_json::json;

    #[test]
    fn test_warc_job_wire_format() {
        let job = WarcJob {
            warc_url: "crawl-data/CC-MAIN-2024-30/file.warc.gz".to_string(),
        };
        let wire = serde_json::to_value(&job).unwrap();
        assert_eq!(
            wire,
            json!({"warc_url": "crawl-data/CC-MAIN-2024-30/file.warc.gz"})
        );

        let parsed: WarcJob = serde_json::from_value(wire).unwrap();
        assert_eq!(parsed.warc_url, job.warc_url);
    }

    #[test]
    fn test_page_record_wire_format() {
        let wire = json!({
            "url": "https://exemple.fr/page",
            "h1": "Bonjour",
            "text": "Un texte en français."
        });
        let record: PageRecord = serde_json::from_value(wire.clone()).unwrap();
        assert_eq!(record.url, "https://exemple.fr/page");
        assert_eq!(record.h1, "Bonjour");
        assert_eq!(serde_json::to_value(&record).unwrap(), wire);
    }

    #[test]
    fn test_embedding_record_round_trip() {
        let record = EmbeddingRecord {
            url: "https://exemple.fr/page".to_string(),
            h1: String::new(),
            embedding: vec![0.5; 384],
        };
        let wire = serde_json::to_vec(&record).unwrap();
        let parsed: EmbeddingRecord = serde_json::from_slice(&wire).unwrap();

        assert_eq!(parsed.embedding.len(), 384);
        assert_eq!(parsed.url, record.url);
        assert_eq!(parsed.h1, "");
    }

    #[test]
    fn test_page_record_rejects_missing_fields() {
        let wire = json!({"url": "https://exemple.fr/page"});
        assert!(serde_json::from_value::<PageRecord>(wire).is_err());
    }
}
