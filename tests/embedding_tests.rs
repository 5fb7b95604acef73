#[cfg(test)]
mod embedding_tests {
    use semcrawl::embedding::reduce_documents;

    fn l2_norm(vector: &[f32]) -> f32 {
        vector.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    #[test]
    fn test_mean_of_segment_rows() {
        // One document, two segments of dim 3.
        let flat = vec![1.0, 2.0, 3.0, 3.0, 2.0, 1.0];
        let docs = reduce_documents(&flat, 3, &[2]);

        assert_eq!(docs.len(), 1);
        // mean = (2, 2, 2), normalized to 1/sqrt(3) each
        let expected = 1.0 / 3.0f32.sqrt();
        for value in &docs[0] {
            assert!((value - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_output_is_unit_norm() {
        let flat: Vec<f32> = (0..4 * 384).map(|i| (i % 17) as f32 - 8.0).collect();
        let docs = reduce_documents(&flat, 384, &[1, 3]);

        assert_eq!(docs.len(), 2);
        for doc in &docs {
            assert_eq!(doc.len(), 384);
            assert!((l2_norm(doc) - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_zero_input_stays_zero() {
        let flat = vec![0.0f32; 2 * 8];
        let docs = reduce_documents(&flat, 8, &[2]);

        assert_eq!(docs.len(), 1);
        assert!(docs[0].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_zero_segment_document_is_zero_vector() {
        let flat = vec![1.0f32; 4];
        let docs = reduce_documents(&flat, 4, &[0, 1]);

        assert_eq!(docs.len(), 2);
        assert!(docs[0].iter().all(|v| *v == 0.0));
        assert!((l2_norm(&docs[1]) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_batched_matches_unbatched() {
        let doc_a: Vec<f32> = (0..2 * 16).map(|i| i as f32 * 0.25).collect();
        let doc_b: Vec<f32> = (0..3 * 16).map(|i| (i as f32).sin()).collect();

        let mut combined = doc_a.clone();
        combined.extend_from_slice(&doc_b);

        let batched = reduce_documents(&combined, 16, &[2, 3]);
        let alone_a = reduce_documents(&doc_a, 16, &[2]);
        let alone_b = reduce_documents(&doc_b, 16, &[3]);

        for (batch_value, alone_value) in batched[0].iter().zip(&alone_a[0]) {
            assert!((batch_value - alone_value).abs() < 1e-5);
        }
        for (batch_value, alone_value) in batched[1].iter().zip(&alone_b[0]) {
            assert!((batch_value - alone_value).abs() < 1e-5);
        }
    }
}
