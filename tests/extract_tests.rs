#[cfg(test)]
mod extract_tests {
    use semcrawl::extract::{first_h1, html_payload, is_french};

    const FRENCH: &str = "La bibliothèque municipale ouvrira ses portes au public \
        dès le mois prochain. Les habitants pourront emprunter des livres, des \
        revues et des films, et participer aux ateliers de lecture organisés \
        chaque semaine par les bénévoles de l'association.";

    const ENGLISH: &str = "The public library will open its doors next month. \
        Residents will be able to borrow books, magazines and films, and take \
        part in the weekly reading workshops organised by volunteers.";

    #[test]
    fn test_language_gate() {
        assert!(is_french(FRENCH));
        assert!(!is_french(ENGLISH));
    }

    #[test]
    fn test_first_h1_text() {
        let html = "<html><body><h1>  Bonjour <b>le monde</b> </h1><h1>Autre</h1></body></html>";
        assert_eq!(first_h1(html), "Bonjour le monde");
    }

    #[test]
    fn test_missing_h1_is_empty() {
        assert_eq!(first_h1("<html><body><p>Texte</p></body></html>"), "");
    }

    #[test]
    fn test_html_payload_skips_http_headers() {
        let raw = "HTTP/1.1 200 OK\nContent-Type: text/html\n\n<html><h1>Bonjour</h1></html>";
        let html = html_payload(raw).unwrap();
        assert!(html.contains("<h1>Bonjour</h1>"));
        assert!(!html.contains("Content-Type"));
    }

    #[test]
    fn test_html_payload_rejects_headerless_content() {
        assert!(html_payload("no header separator here").is_none());
    }
}
