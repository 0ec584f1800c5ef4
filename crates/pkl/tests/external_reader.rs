//! The external reader client over in-memory streams.

use std::sync::Arc;

use futures::SinkExt;
use pkl::proto::{
    CloseExternalProcess, IncomingMessage, InitializeModuleReader, InitializeResourceReader,
    ListResources, MessageCodec, OutgoingMessage, PathElement, ReadResource,
};
use pkl::{ExternalReaderClient, Reader, ReaderError, ResourceReader};
use tokio_util::codec::FramedWrite;
use url::Url;

struct Flintstones;

#[async_trait::async_trait]
impl Reader for Flintstones {
    fn scheme(&self) -> &str {
        "flintstone"
    }

    fn is_globbable(&self) -> bool {
        true
    }

    async fn list_elements(&self, _uri: &Url) -> Result<Vec<PathElement>, ReaderError> {
        Ok(vec![
            PathElement::new("barney", false),
            PathElement::new("fred", false),
            PathElement::new("wilma", false),
        ])
    }
}

#[async_trait::async_trait]
impl ResourceReader for Flintstones {
    async fn read(&self, uri: &Url) -> Result<Vec<u8>, ReaderError> {
        Ok(format!("{} Flintstone", uri.path()).into_bytes())
    }
}

/// Runs a client over duplex pipes and returns (request sink, raw response
/// stream, completion handle). Responses are host->evaluator frames, so
/// they are read raw and decoded with [`read_outgoing`].
fn spawn_client(
    client: ExternalReaderClient,
) -> (
    FramedWrite<tokio::io::DuplexStream, MessageCodec>,
    tokio::io::DuplexStream,
    tokio::task::JoinHandle<pkl::Result<()>>,
) {
    let (request_tx, request_rx) = tokio::io::duplex(64 * 1024);
    let (response_tx, response_rx) = tokio::io::duplex(64 * 1024);
    let handle = tokio::spawn(async move { client.run_with(request_rx, response_tx).await });
    (
        FramedWrite::new(request_tx, MessageCodec::new()),
        response_rx,
        handle,
    )
}

#[tokio::test]
async fn serves_reads_lists_and_initialize() {
    let client = ExternalReaderClient::new().with_resource_reader(Arc::new(Flintstones));
    let (mut requests, mut response_bytes, handle) = spawn_client(client);

    requests
        .send(IncomingMessage::InitializeResourceReader(
            InitializeResourceReader {
                request_id: 1,
                scheme: "flintstone".to_owned(),
            },
        ))
        .await
        .unwrap();
    let response = read_outgoing(&mut response_bytes).await;
    let OutgoingMessage::InitializeResourceReaderResponse(init) = response else {
        panic!("unexpected response: {response:?}");
    };
    assert_eq!(init.request_id, 1);
    let spec = init.spec.expect("a registered scheme returns its spec");
    assert_eq!(spec.scheme, "flintstone");
    assert!(spec.is_globbable);

    // unknown scheme: an empty spec
    requests
        .send(IncomingMessage::InitializeModuleReader(
            InitializeModuleReader {
                request_id: 2,
                scheme: "rubble".to_owned(),
            },
        ))
        .await
        .unwrap();
    let response = read_outgoing(&mut response_bytes).await;
    let OutgoingMessage::InitializeModuleReaderResponse(init) = response else {
        panic!("unexpected response: {response:?}");
    };
    assert!(init.spec.is_none());

    requests
        .send(IncomingMessage::ReadResource(ReadResource {
            request_id: 3,
            evaluator_id: 42,
            uri: "flintstone:fred".to_owned(),
        }))
        .await
        .unwrap();
    let response = read_outgoing(&mut response_bytes).await;
    let OutgoingMessage::ReadResourceResponse(read) = response else {
        panic!("unexpected response: {response:?}");
    };
    assert_eq!(read.request_id, 3);
    assert_eq!(read.evaluator_id, 42);
    assert_eq!(read.contents, b"fred Flintstone");

    requests
        .send(IncomingMessage::ListResources(ListResources {
            request_id: 4,
            evaluator_id: 42,
            uri: "flintstone:*".to_owned(),
        }))
        .await
        .unwrap();
    let response = read_outgoing(&mut response_bytes).await;
    let OutgoingMessage::ListResourcesResponse(list) = response else {
        panic!("unexpected response: {response:?}");
    };
    let names: Vec<&str> = list.path_elements.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["barney", "fred", "wilma"]);

    // reads for an unregistered scheme produce the canonical error
    requests
        .send(IncomingMessage::ReadResource(ReadResource {
            request_id: 5,
            evaluator_id: 42,
            uri: "rubble:barney".to_owned(),
        }))
        .await
        .unwrap();
    let response = read_outgoing(&mut response_bytes).await;
    let OutgoingMessage::ReadResourceResponse(read) = response else {
        panic!("unexpected response: {response:?}");
    };
    assert_eq!(read.error, "No resource reader found for scheme `rubble`");

    // the evaluator ends the session
    requests
        .send(IncomingMessage::CloseExternalProcess(
            CloseExternalProcess {},
        ))
        .await
        .unwrap();
    handle.await.unwrap().unwrap();
}

/// Reads one frame off the stream and decodes it as an outgoing message.
async fn read_outgoing(stream: &mut tokio::io::DuplexStream) -> OutgoingMessage {
    use tokio::io::AsyncReadExt;

    let mut buf = Vec::new();
    loop {
        if let Ok(Some(size)) = pkl::proto::msgpack_element_size(&buf) {
            let frame: Vec<u8> = buf.drain(..size).collect();
            return OutgoingMessage::decode(&frame).unwrap();
        }
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "stream closed before a full frame arrived");
        buf.extend_from_slice(&chunk[..n]);
    }
}
