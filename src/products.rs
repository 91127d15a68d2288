//! Product and price extraction from a single PDF into CSV.
//!
//! The chat model is asked for structured output matching a strict JSON
//! schema; titles and prices are nullable and become empty CSV cells.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::extract;
use crate::llm::{ChatMessage, ChatModel, JsonSchema, OpenAIChat};

pub const DEFAULT_PDF: &str = "raw-documents/Milk _ Target.pdf";
pub const DEFAULT_OUTPUT: &str = "output.csv";

const SYSTEM_PROMPT: &str =
    "You are an expert extraction algorithm. Extract product titles and prices accurately.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// The title of the product.
    pub title: Option<String>,
    /// The price of the product.
    pub price: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductList {
    pub products: Vec<Product>,
}

/// Strict JSON schema for [`ProductList`].
pub fn product_schema() -> JsonSchema {
    let nullable = |description: &str| {
        serde_json::json!({
            "type": ["string", "null"],
            "description": description,
        })
    };

    JsonSchema {
        name: "ProductList".to_string(),
        schema: serde_json::json!({
            "type": "object",
            "properties": {
                "products": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "title": nullable("The title of the product"),
                            "price": nullable("The price of the product"),
                        },
                        "required": ["title", "price"],
                        "additionalProperties": false,
                    }
                }
            },
            "required": ["products"],
            "additionalProperties": false,
        }),
    }
}

/// Ask `llm` for every product title and price mentioned in `text`.
pub async fn extract_products(llm: &dyn ChatModel, text: &str) -> Result<Vec<Product>> {
    let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(text)];
    let value = llm.complete_json(&messages, &product_schema()).await?;
    let list: ProductList =
        serde_json::from_value(value).context("model output does not match the product schema")?;
    Ok(list.products)
}

/// Write `products` as a `Title,Price` CSV.
pub fn save_to_csv(products: &[Product], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    writer.write_record(["Title", "Price"])?;
    for product in products {
        writer.write_record([
            product.title.as_deref().unwrap_or(""),
            product.price.as_deref().unwrap_or(""),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// `llmaps extract`.
pub async fn run_extract(config: &Config, pdf: Option<PathBuf>, output: Option<PathBuf>) -> Result<()> {
    let pdf = pdf.unwrap_or_else(|| PathBuf::from(DEFAULT_PDF));
    let output = output.unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));

    println!("Extracting text from {}...", pdf.display());
    let text = extract::pdf_to_text(&pdf)
        .with_context(|| format!("failed to extract {}", pdf.display()))?;

    println!("Extracting products using {}...", config.llm.model);
    let llm = OpenAIChat::for_extraction(&config.llm)?;
    let products = extract_products(&llm, &text).await?;
    tracing::info!(count = products.len(), "extracted products");

    println!("Saving results to {}...", output.display());
    save_to_csv(&products, &output)?;

    println!("Extraction complete. Data saved to {}", output.display());
    Ok(())
}
