// src/main.rs

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::error::Error;

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Stats {
    created: u64,
    updated: u64,
    closed: u64,
    skipped: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunReport {
    success: bool,
    run_id: String,
    duration_ms: i64,
    stats: Stats,
    warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockStatus {
    is_held: bool,
    locked_by: Option<String>,
    expires_at: Option<String>,
}

async fn trigger_run(client: &Client, base_url: &str, body: &Value) -> Result<(StatusCode, Value), Box<dyn Error>> {
    let response = client
        .post(format!("{}/api/reconciliation/run", base_url))
        .json(body)
        .send()
        .await?;
    let status = response.status();
    Ok((status, response.json::<Value>().await?))
}

fn print_report(label: &str, report: &RunReport) {
    println!(
        "{}: success={} run={} {}ms created={} updated={} closed={} skipped={} warnings={}",
        label,
        report.success,
        report.run_id,
        report.duration_ms,
        report.stats.created,
        report.stats.updated,
        report.stats.closed,
        report.stats.skipped,
        report.warnings.len()
    );
    for warning in &report.warnings {
        println!("  ⚠️ {}", warning);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let base_url = std::env::var("CREWSHIFT_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
    let reference_date = std::env::args().nth(1);
    let client = Client::new();

    // Test 1: Health check
    println!("\n🔍 Testing health check endpoint...");
    let health = client
        .get(format!("{}/health", base_url))
        .send()
        .await?
        .json::<HealthResponse>()
        .await?;
    println!("Health: {} at {}", health.status, health.timestamp);

    let body = json!({
        "referenceDate": reference_date,
        "intervaloDias": 7,
    });

    // Test 2: Dry run writes nothing
    println!("\n🔍 Testing dry run...");
    let mut dry_body = body.clone();
    dry_body["dryRun"] = json!(true);
    let (status, value) = trigger_run(&client, &base_url, &dry_body).await?;
    println!("Dry run status: {}", status);
    if status.is_success() {
        print_report("Dry run", &serde_json::from_value(value)?);
    } else {
        println!("Dry run failed: {}", value);
    }

    // Test 3: Real run, then an identical re-run that should only skip
    println!("\n🔍 Testing run and idempotent re-run...");
    for label in ["First run", "Re-run"] {
        let (status, value) = trigger_run(&client, &base_url, &body).await?;
        if status.is_success() {
            print_report(label, &serde_json::from_value(value)?);
        } else {
            println!("{} returned {}: {}", label, status, value);
        }
    }

    // Test 4: Concurrent runs; expect at most one success and the rest 409
    println!("\n🔍 Testing concurrent runs...");
    let (a, b, c) = tokio::join!(
        trigger_run(&client, &base_url, &body),
        trigger_run(&client, &base_url, &body),
        trigger_run(&client, &base_url, &body),
    );
    let mut ok = 0;
    let mut conflicts = 0;
    for result in [a, b, c] {
        match result?.0 {
            StatusCode::OK => ok += 1,
            StatusCode::CONFLICT => conflicts += 1,
            other => println!("Unexpected status: {}", other),
        }
    }
    println!("Concurrent results: {} succeeded, {} conflicted", ok, conflicts);

    // Test 5: Lock state after all runs
    println!("\n🔍 Testing lock status...");
    let lock = client
        .get(format!("{}/api/reconciliation/lock", base_url))
        .send()
        .await?
        .json::<LockStatus>()
        .await?;
    println!(
        "Lock held: {} (by {:?}, until {:?})",
        lock.is_held, lock.locked_by, lock.expires_at
    );

    // Test 6: Invalid request
    println!("\n🔍 Testing invalid request...");
    let (status, value) = trigger_run(&client, &base_url, &json!({ "intervaloDias": 0 })).await?;
    println!("Invalid request status: {} body: {}", status, value);

    println!("\n✅ Testing complete!");
    Ok(())
}
