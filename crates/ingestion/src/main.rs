//! bookchat Ingestion Tool
//!
//! Prepares book markdown for retrieval:
//! 1. Walks the documentation tree
//! 2. Cleans and chunks each file
//! 3. Submits chunk batches to the gateway's ingestion endpoint
//!
//! Usage: ingestion [docs_dir]
//! The gateway address comes from BOOKCHAT_API (default http://localhost:8000).

mod processor;

use anyhow::{bail, Context, Result};
use bookchat_common::config::AppConfig;
use bookchat_common::rag::IngestDocument;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use tracing::{info, Level};

/// Documents per ingestion request
const BATCH_SIZE: usize = 50;

#[derive(Deserialize)]
struct IngestResponse {
    documents_processed: usize,
    new_records: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(true)
        .json()
        .init();

    info!("Starting bookchat ingestion v{}", bookchat_common::VERSION);

    let docs_dir = std::env::args().nth(1).unwrap_or_else(|| "docs".to_string());
    let api_base = std::env::var("BOOKCHAT_API")
        .unwrap_or_else(|_| "http://localhost:8000".to_string());

    let config = AppConfig::load().context("failed to load configuration")?;

    let documents = processor::prepare_documents(Path::new(&docs_dir), &config.retrieval)?;
    if documents.is_empty() {
        bail!("no markdown content found under {}", docs_dir);
    }
    info!(documents = documents.len(), "Content prepared");

    let (processed, new_records) = submit(&api_base, &documents).await?;
    info!(processed, new_records, "Ingestion complete");
    Ok(())
}

/// Submit documents to the gateway in batches
async fn submit(api_base: &str, documents: &[IngestDocument]) -> Result<(usize, usize)> {
    let client = reqwest::Client::new();
    let url = format!("{}/api/documents/ingest", api_base.trim_end_matches('/'));

    let mut processed = 0;
    let mut new_records = 0;

    for batch in documents.chunks(BATCH_SIZE) {
        let response = client
            .post(&url)
            .json(&json!({ "documents": batch }))
            .send()
            .await
            .context("ingestion request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("ingestion rejected with {}: {}", status, body);
        }

        let receipt: IngestResponse = response
            .json()
            .await
            .context("cannot parse ingestion response")?;
        processed += receipt.documents_processed;
        new_records += receipt.new_records;

        info!(
            batch = batch.len(),
            processed, "Batch submitted"
        );
    }

    Ok((processed, new_records))
}
