#[cfg(test)]
mod search_tests {
    use semcrawl::records::EmbeddingRecord;
    use semcrawl::search::{index_mapping, BulkBatcher};

    fn record(n: usize) -> EmbeddingRecord {
        EmbeddingRecord {
            url: format!("https://exemple.fr/page-{n}"),
            h1: format!("Titre {n}"),
            embedding: vec![0.0; 384],
        }
    }

    #[test]
    fn test_index_mapping_hnsw_settings() {
        let mapping = index_mapping(384);

        assert_eq!(mapping["settings"]["index"]["knn"], true);
        assert_eq!(mapping["settings"]["index"]["knn.algo_param.m"], 16);
        assert_eq!(
            mapping["settings"]["index"]["knn.algo_param.ef_construction"],
            512
        );
        assert_eq!(mapping["settings"]["index"]["knn.algo_param.ef_search"], 512);
    }

    #[test]
    fn test_index_mapping_fields() {
        let mapping = index_mapping(384);
        let properties = &mapping["mappings"]["properties"];

        assert_eq!(properties["url"]["type"], "keyword");
        assert_eq!(properties["h1"]["type"], "text");
        assert_eq!(properties["embedding"]["type"], "knn_vector");
        assert_eq!(properties["embedding"]["dimension"], 384);
    }

    #[test]
    fn test_batcher_holds_until_capacity() {
        let mut batcher = BulkBatcher::new(3);

        assert!(batcher.push(record(0), 1).is_none());
        assert!(batcher.push(record(1), 2).is_none());
        assert_eq!(batcher.len(), 2);

        let batch = batcher.push(record(2), 3).expect("batch should be full");
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.last_tag, 3);

        // accumulator was cleared before the snapshot was handed out
        assert!(batcher.is_empty());
    }

    #[test]
    fn test_batcher_ack_count_matches_action_count() {
        let mut batcher = BulkBatcher::new(5);
        for n in 0..4 {
            assert!(batcher.push(record(n), n as u64 + 1).is_none());
        }
        let batch = batcher.push(record(4), 5).unwrap();

        // a multi-ack on last_tag releases exactly one delivery per document
        assert_eq!(batch.records.len(), 5);
        assert_eq!(batch.last_tag, 5);
    }

    #[test]
    fn test_partial_flush_on_shutdown() {
        let mut batcher = BulkBatcher::new(1000);
        for n in 0..37 {
            assert!(batcher.push(record(n), n as u64 + 1).is_none());
        }

        let batch = batcher.take().expect("residual batch expected");
        assert_eq!(batch.len(), 37);
        assert_eq!(batch.last_tag, 37);
        assert!(batcher.take().is_none());
    }

    #[test]
    fn test_take_on_empty_batcher() {
        let mut batcher = BulkBatcher::new(10);
        assert!(batcher.take().is_none());
    }

    #[test]
    fn test_batcher_refills_after_snapshot() {
        let mut batcher = BulkBatcher::new(2);
        batcher.push(record(0), 1);
        let first = batcher.push(record(1), 2).unwrap();
        assert_eq!(first.last_tag, 2);

        batcher.push(record(2), 3);
        let second = batcher.push(record(3), 4).unwrap();
        assert_eq!(second.last_tag, 4);
        assert_eq!(second.len(), 2);
    }
}
