//! An external reader executable serving a directory tree.
//!
//! Point an evaluator at it via `externalResourceReaders` (or
//! `EvaluatorOptions::with_external_resource_reader`) and the Pkl backend
//! will spawn this process and read `vault:` resources through it:
//!
//! ```pkl
//! secret = read("vault:/service/token").text
//! ```

use std::sync::Arc;

use pkl::{ExternalReaderClient, FsReader};

#[tokio::main]
async fn main() -> pkl::Result<()> {
    let root = std::env::args().nth(1).unwrap_or_else(|| ".".to_owned());
    let reader = Arc::new(FsReader::new(root, "vault"));
    ExternalReaderClient::new()
        .with_resource_reader(reader.clone())
        .with_module_reader(reader)
        .run()
        .await
}
