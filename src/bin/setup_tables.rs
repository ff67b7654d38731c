//! CLI tool to create the DynamoDB tables for postcard-studio
//!
//! Usage:
//!   cargo run --bin setup_tables
//!
//! For local development with DynamoDB Local:
//!   DYNAMODB_ENDPOINT_URL=http://localhost:8001 cargo run --bin setup_tables

use anyhow::{Context, Result};
use aws_sdk_dynamodb::types::{
    AttributeDefinition, BillingMode, KeySchemaElement, KeyType, ScalarAttributeType, TableStatus,
    TimeToLiveSpecification,
};
use clap::Parser;
use postcard_studio::config::{create_dynamodb_client, Settings};
use std::time::Duration;

/// Create the users, OTP and cards tables
#[derive(Parser, Debug)]
#[command(name = "setup_tables")]
#[command(about = "Create DynamoDB tables for postcard-studio")]
struct Args {
    /// DynamoDB endpoint URL (overrides DYNAMODB_ENDPOINT_URL)
    #[arg(long)]
    endpoint_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load()?;
    if let Some(url) = args.endpoint_url {
        settings.dynamodb_endpoint_url = Some(url);
    }
    if let Some(url) = &settings.dynamodb_endpoint_url {
        println!("Using DynamoDB endpoint: {}", url);
    }

    let client = create_dynamodb_client(&settings).await;

    let tables = [
        (settings.dynamodb_users_table.as_str(), "email"),
        (settings.dynamodb_otps_table.as_str(), "email"),
        (settings.dynamodb_cards_table.as_str(), "id"),
    ];

    println!("\nSetting up DynamoDB tables...\n");

    let mut failures = 0;
    for (table_name, pk_name) in tables {
        match create_table(&client, table_name, pk_name).await {
            Ok(true) => println!("Created table: {}", table_name),
            Ok(false) => println!("Table already exists: {}", table_name),
            Err(e) => {
                failures += 1;
                println!("Failed to create table {}: {:#}", table_name, e);
            }
        }
    }

    let otps = settings.dynamodb_otps_table.as_str();
    match enable_ttl(&client, otps, "expires_at").await {
        Ok(()) => println!("TTL enabled on {}.expires_at", otps),
        Err(e) => {
            failures += 1;
            println!("Failed to enable TTL on {}: {:#}", otps, e);
        }
    }

    if failures > 0 {
        anyhow::bail!("{} table setup step(s) failed", failures);
    }

    println!("\nTable setup complete!\n");
    Ok(())
}

/// Create a table keyed on a single string attribute; false if it exists
async fn create_table(client: &aws_sdk_dynamodb::Client, table_name: &str, pk_name: &str) -> Result<bool> {
    let tables = client.list_tables().send().await?;
    if tables.table_names().iter().any(|name| name == table_name) {
        return Ok(false);
    }

    client
        .create_table()
        .table_name(table_name)
        .attribute_definitions(
            AttributeDefinition::builder()
                .attribute_name(pk_name)
                .attribute_type(ScalarAttributeType::S)
                .build()?,
        )
        .key_schema(
            KeySchemaElement::builder()
                .attribute_name(pk_name)
                .key_type(KeyType::Hash)
                .build()?,
        )
        .billing_mode(BillingMode::PayPerRequest)
        .send()
        .await
        .with_context(|| format!("CreateTable {}", table_name))?;

    wait_until_active(client, table_name).await?;
    Ok(true)
}

async fn wait_until_active(client: &aws_sdk_dynamodb::Client, table_name: &str) -> Result<()> {
    for _ in 0..30 {
        let status = client
            .describe_table()
            .table_name(table_name)
            .send()
            .await?
            .table()
            .and_then(|t| t.table_status().cloned());

        if status == Some(TableStatus::Active) {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    anyhow::bail!("table {} did not become active", table_name)
}

/// Expire items once `attribute` (unix seconds) has passed
async fn enable_ttl(client: &aws_sdk_dynamodb::Client, table_name: &str, attribute: &str) -> Result<()> {
    let current = client
        .describe_time_to_live()
        .table_name(table_name)
        .send()
        .await?;

    let already = current
        .time_to_live_description()
        .and_then(|d| d.attribute_name())
        .map(|name| name == attribute)
        .unwrap_or(false);
    if already {
        return Ok(());
    }

    client
        .update_time_to_live()
        .table_name(table_name)
        .time_to_live_specification(
            TimeToLiveSpecification::builder()
                .attribute_name(attribute)
                .enabled(true)
                .build()?,
        )
        .send()
        .await
        .with_context(|| format!("UpdateTimeToLive {}", table_name))?;

    Ok(())
}
