//! Evaluates a module and prints its rendered output.
//!
//! Run with a module path, or with no arguments to evaluate an inline
//! example:
//!
//! ```sh
//! cargo run --example evaluate -- config/app.pkl
//! ```

use pkl::{EvaluatorOptions, ModuleSource};

#[tokio::main]
async fn main() -> pkl::Result<()> {
    tracing_subscriber::fmt::init();

    let source = match std::env::args().nth(1) {
        Some(path) => ModuleSource::file(path)?,
        None => ModuleSource::text("greeting { message = \"Hello from Pkl\" }"),
    };

    let evaluator = pkl::new_evaluator(EvaluatorOptions::preconfigured()).await?;
    let text = evaluator.evaluate_output_text(&source).await?;
    print!("{text}");
    evaluator.close().await
}
