#[cfg(test)]
mod telemetry_tests {
    use semcrawl::logstore::collection_for_step;
    use semcrawl::telemetry::TelemetryEvent;

    #[test]
    fn test_warc_event_wire_format() {
        let event = TelemetryEvent::Warc {
            warc_url: "crawl-data/file.warc.gz".to_string(),
            total_time: 10.0,
            download_time: 4.0,
            load_time: 3.0,
            processing_time: 2.0,
            rabbit_connection_time: 1.0,
            computer: "worker-1".to_string(),
        };
        let wire = serde_json::to_value(&event).unwrap();

        assert_eq!(wire["step"], "warc");
        assert_eq!(wire["warc_url"], "crawl-data/file.warc.gz");
        assert_eq!(wire["download_time"], 4.0);
        assert_eq!(wire["computer"], "worker-1");
    }

    #[test]
    fn test_vector_event_wire_format() {
        let event = TelemetryEvent::Vector {
            url: "https://exemple.fr/page".to_string(),
            time_encode: 0.5,
            time_embeding: 1.5,
            time_get_rabbit_connection: 0.1,
            computer: "gpu-1".to_string(),
        };
        let wire = serde_json::to_value(&event).unwrap();

        assert_eq!(wire["step"], "vector");
        assert_eq!(wire["url"], "https://exemple.fr/page");
        // historical wire spelling, consumed as-is downstream
        assert_eq!(wire["time_embeding"], 1.5);
    }

    #[test]
    fn test_index_event_wire_format() {
        let event = TelemetryEvent::IndexBatchAsync {
            batchsize: 1000,
            batch_time: 2.5,
            cumulative_index_time: 40.0,
            time_rabbitmq_connection: 0.2,
            time_es_connection: 0.3,
            machine: "indexer-1".to_string(),
        };
        let wire = serde_json::to_value(&event).unwrap();

        assert_eq!(wire["step"], "index_batch_async");
        assert_eq!(wire["batchsize"], 1000);
        assert_eq!(wire["machine"], "indexer-1");
    }

    #[test]
    fn test_step_routing() {
        assert_eq!(collection_for_step("warc"), Some(("warc_logs", "warc_url")));
        assert_eq!(collection_for_step("vector"), Some(("vector_logs", "url")));
        assert_eq!(
            collection_for_step("index_batch_async"),
            Some(("index_logs", "machine"))
        );
    }

    #[test]
    fn test_unknown_step_is_not_routed() {
        assert_eq!(collection_for_step("index"), None);
        assert_eq!(collection_for_step(""), None);
        assert_eq!(collection_for_step("WARC"), None);
    }

    #[test]
    fn test_every_event_routes_somewhere() {
        for event in [
            serde_json::to_value(&TelemetryEvent::Warc {
                warc_url: String::new(),
                total_time: 0.0,
                download_time: 0.0,
                load_time: 0.0,
                processing_time: 0.0,
                rabbit_connection_time: 0.0,
                computer: String::new(),
            })
            .unwrap(),
            serde_json::to_value(&TelemetryEvent::Vector {
                url: String::new(),
                time_encode: 0.0,
                time_embeding: 0.0,
                time_get_rabbit_connection: 0.0,
                computer: String::new(),
            })
            .unwrap(),
            serde_json::to_value(&TelemetryEvent::IndexBatchAsync {
                batchsize: 0,
                batch_time: 0.0,
                cumulative_index_time: 0.0,
                time_rabbitmq_connection: 0.0,
                time_es_connection: 0.0,
                machine: String::new(),
            })
            .unwrap(),
        ] {
            let step = event["step"].as_str().unwrap();
            assert!(collection_for_step(step).is_some(), "unrouted step {step}");
        }
    }
}
