//! Cross-direction protocol tests: frames written by one side decode
//! intact on the other, through the streaming codec.

use bytes::BytesMut;
use pkl_proto::{
    code, CreateEvaluator, Evaluate, EvaluateResponse, IncomingMessage, ListModulesResponse,
    MessageCodec, ModuleReaderSpec, OutgoingMessage, PathElement, ReadResource,
    ResourceReaderSpec,
};
use tokio_util::codec::{Decoder, Encoder};

#[test]
fn a_full_session_worth_of_frames_survives_the_stream() {
    // evaluator -> host traffic, concatenated as it would arrive on stdout
    let inbound = [
        IncomingMessage::CreateEvaluatorResponse(pkl_proto::CreateEvaluatorResponse {
            request_id: 10,
            evaluator_id: 1,
            error: String::new(),
        }),
        IncomingMessage::ReadResource(ReadResource {
            request_id: 11,
            evaluator_id: 1,
            uri: "flintstone:fred".into(),
        }),
        IncomingMessage::EvaluateResponse(EvaluateResponse {
            request_id: 12,
            evaluator_id: 1,
            result: vec![0xa3, b'f', b'o', b'o'],
            error: String::new(),
        }),
    ];

    let mut codec = MessageCodec::new();
    let mut stream = BytesMut::new();
    for msg in &inbound {
        codec.encode(msg.clone(), &mut stream).unwrap();
    }

    let mut decoded = Vec::new();
    while let Some(msg) = codec.decode(&mut stream).unwrap() {
        decoded.push(msg);
    }
    assert_eq!(decoded.as_slice(), inbound.as_slice());
}

#[test]
fn host_frames_decode_on_the_evaluator_side() {
    let outbound = [
        OutgoingMessage::from(CreateEvaluator {
            request_id: 1,
            resource_readers: vec![ResourceReaderSpec {
                scheme: "flintstone".into(),
                has_hierarchical_uris: false,
                is_globbable: true,
            }],
            module_readers: vec![ModuleReaderSpec {
                scheme: "myfs".into(),
                has_hierarchical_uris: true,
                is_globbable: true,
                is_local: true,
            }],
            allowed_modules: vec!["pkl:".into(), "repl:".into(), "flintstone:".into()],
            output_format: Some("yaml".into()),
            ..Default::default()
        }),
        OutgoingMessage::Evaluate(Evaluate {
            request_id: 2,
            evaluator_id: 1,
            module_uri: "repl:text".into(),
            module_text: "foo { bar = 1 }".into(),
            expr: "output.text".into(),
        }),
        OutgoingMessage::ListModulesResponse(ListModulesResponse {
            request_id: 3,
            evaluator_id: 1,
            path_elements: vec![
                PathElement::new("a.pkl", false),
                PathElement::new("sub", true),
            ],
            error: String::new(),
        }),
    ];

    for msg in &outbound {
        let frame = msg.encode().unwrap();
        assert_eq!(&OutgoingMessage::decode(&frame).unwrap(), msg);
    }
}

#[test]
fn frame_codes_match_the_protocol_table() {
    let evaluate = OutgoingMessage::Evaluate(Evaluate::default());
    assert_eq!(evaluate.code(), code::EVALUATE);
    assert_eq!(code::EVALUATE, 0x23);
    assert_eq!(code::CREATE_EVALUATOR, 0x20);
    assert_eq!(code::CLOSE_EXTERNAL_PROCESS, 0x32);

    // the code is the first element of the encoded pair
    let frame = evaluate.encode().unwrap();
    let mut rd = rmp::decode::Bytes::new(&frame);
    assert_eq!(rmp::decode::read_array_len(&mut rd).unwrap(), 2);
    let code: i64 = rmp::decode::read_int(&mut rd).unwrap();
    assert_eq!(code, 0x23);
}
