use crate::error::{ErnieError, ErnieResult};
use crate::http_client::{interpret_body, BlockingTransmission, Transmission};
use crate::response::Envelope;
use crate::tests::helpers::envelope;
use futures_util::StreamExt;
use serde_json::json;
use std::collections::BTreeMap;

#[cfg(test)]
mod http_client_tests {
    use super::*;

    // UNIT UNDER TEST: interpret_body, Transmission, EnvelopeIter
    //
    // BUSINESS RESPONSIBILITY:
    //   - Turns a complete HTTP body into an envelope
    //   - Rejects non-200 statuses with the full exchange attached
    //   - Lets callers treat single and streamed results uniformly
    //
    // TEST COVERAGE:
    //   - JSON, text and error bodies
    //   - Single-to-stream and stream-to-single conversions
    //   - Closing a blocking iterator

    #[test]
    fn test_json_body_becomes_envelope() {
        // Act
        let envelope = interpret_body(200, r#"{"result":"ok"}"#.to_string(), BTreeMap::new())
            .expect("envelope");

        // Assert
        assert_eq!(envelope["result"], "ok");
    }

    #[test]
    fn test_text_body_is_kept_verbatim() {
        // Act
        let envelope = interpret_body(200, "not json".to_string(), BTreeMap::new()).unwrap();

        // Assert
        assert_eq!(envelope.body(), "not json");
    }

    #[test]
    fn test_non_200_becomes_http_request_error_with_context() {
        // Arrange
        let headers = BTreeMap::from([("x-trace".to_string(), "t-1".to_string())]);

        // Act
        let error = interpret_body(503, r#"{"status_code":"busy"}"#.to_string(), headers).unwrap_err();

        // Assert
        match error {
            ErnieError::HttpRequest(details) => {
                assert_eq!(details.status_code, Some(503));
                assert_eq!(details.body.as_deref(), Some(r#"{"status_code":"busy"}"#));
                assert_eq!(details.headers.get("x-trace").map(String::as_str), Some("t-1"));
            }
            other => panic!("expected HttpRequest, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_single_transmission_streams_once() {
        // Arrange
        let transmission = Transmission::Single(envelope(json!({"result": "only"})));

        // Act
        let items: Vec<_> = transmission.into_stream().collect().await;

        // Assert
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap()["result"], "only");
    }

    #[test]
    fn test_stream_transmission_is_not_a_single_response() {
        // Arrange
        let transmission = Transmission::Stream(Box::pin(futures_util::stream::empty::<ErnieResult<Envelope>>()));

        // Act & Assert
        assert!(transmission.is_stream());
        assert!(matches!(
            transmission.into_single(),
            Err(ErnieError::ResponseParsing { .. })
        ));
    }

    #[test]
    fn test_blocking_single_iterates_once_then_closes() {
        // Arrange
        let mut iter = BlockingTransmission::Single(envelope(json!({"n": 1}))).into_envelopes();

        // Act
        let first = iter.next();
        let second = iter.next();

        // Assert
        assert!(first.is_some());
        assert!(second.is_none());
        assert!(iter.is_closed());
    }

    #[test]
    fn test_closed_iterator_yields_nothing() {
        // Arrange
        let mut iter = BlockingTransmission::Single(envelope(json!({"n": 1}))).into_envelopes();

        // Act
        iter.close();

        // Assert
        assert!(iter.next().is_none());
    }
}
