//! Fires concurrent submissions at one form and prints how the server answered.
//!
//! With `--create-limit N` a fresh form with `feedbackLimit = N` is created first. At most `N` responses may
//! come back `201`. Contended submissions answer `503`, so when at least `N` requests are sent every slot is
//! either filled or was lost to contention: `201 + 503 >= N`.
use std::collections::BTreeMap;

use anyhow::{Context, bail};
use clap::Parser;
use model::{
    Field, Form,
    payloads::{ApiResponse, CreateForm},
};
use reqwest::{Client, StatusCode};
use serde_json::json;
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:5000")]
    url: String,

    /// Public or internal id of an existing form.
    #[arg(long)]
    form: Option<String>,

    #[arg(long, default_value_t = 10)]
    count: usize,

    /// Create a fresh form with this feedback limit and target it.
    #[arg(long)]
    create_limit: Option<u64>,
}

async fn create_form(client: &Client, url: &str, limit: u64) -> anyhow::Result<Form> {
    let payload = CreateForm {
        name: "Load test".to_string(),
        uid: "tester".to_string(),
        fields: vec![Field {
            kind: "text".to_string(),
            label: "Index".to_string(),
            options: Vec::new(),
            required: false,
        }],
        feedback_limit: Some(limit),
    };

    let response: ApiResponse<Form> = client
        .post(format!("{url}/api/forms"))
        .json(&payload)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    response.data.context("form creation returned no form")
}

async fn submit(client: Client, url: String, form_id: String, index: usize) -> Option<StatusCode> {
    let body = json!({
        "formId": form_id,
        "formName": "Load test",
        "responses": { "index": index },
        "metadata": { "locationLabel": "Tester" },
    });

    match client.post(format!("{url}/api/feedback")).json(&body).send().await {
        Ok(response) => Some(response.status()),
        Err(e) => {
            warn!("Request {index} failed: {e}");
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let client = Client::new();
    let url = args.url.trim_end_matches('/').to_string();

    let form_id = match (args.create_limit, args.form) {
        (Some(limit), _) => {
            let form = create_form(&client, &url, limit).await?;
            info!(form = %form.custom_id, limit, "Created form");
            form.custom_id
        }
        (None, Some(form)) => form,
        (None, None) => bail!("either --form or --create-limit is required"),
    };

    let mut requests = JoinSet::new();
    for index in 0..args.count {
        requests.spawn(submit(client.clone(), url.clone(), form_id.clone(), index));
    }

    let mut statuses: BTreeMap<String, usize> = BTreeMap::new();
    while let Some(result) = requests.join_next().await {
        let label = match result {
            Ok(Some(status)) => status.as_u16().to_string(),
            Ok(None) => "failed".to_string(),
            Err(e) => {
                warn!("Request task panicked: {e}");
                "panicked".to_string()
            }
        };
        *statuses.entry(label).or_default() += 1;
    }

    println!("Form: {form_id}");
    println!("Requests: {}\n", args.count);
    for (status, count) in &statuses {
        println!("{status}: {count}");
    }

    let created = statuses.get("201").copied().unwrap_or(0) as u64;
    let contended = statuses.get("503").copied().unwrap_or(0) as u64;
    println!("\nCreated: {created}");
    println!("Contended: {contended}");

    if let Some(limit) = args.create_limit {
        if created > limit {
            bail!("limit {limit} exceeded: {created} submissions created");
        }
        if args.count as u64 >= limit && created + contended < limit {
            bail!("only {created} created and {contended} contended for a limit of {limit}");
        }
    }

    Ok(())
}
