mod args;

pub use args::{Args, Commands, FailedArgs, PublishArgs, StatusArgs};
use clap::Parser;
use common::{DEFAULT_QUEUE, Database, FailedAttempt, OutcomeStore, RequestQueue, TransactionRequest};

/// Runs the CLI command parser and executes the selected command.
/// Returns true if a CLI command was handled, false otherwise.
pub async fn run_cli() -> bool {
    let args = Args::parse();
    match &args.command {
        Some(Commands::Publish(publish_args)) => {
            match publish(publish_args).await {
                Ok(queue) => println!("Payment request published to `{}`", queue),
                Err(e) => eprintln!("Failed to publish payment request: {e:#}"),
            }
            true
        }
        Some(Commands::Status(status_args)) => {
            match transaction_status(status_args.id).await {
                Ok(Some(status)) => println!("Transaction {}: {}", status_args.id, status),
                Ok(None) => println!("Transaction {}: not found", status_args.id),
                Err(e) => eprintln!("Failed to get transaction status: {e:#}"),
            }
            true
        }
        Some(Commands::Failed(failed_args)) => {
            match failed_transactions(failed_args.exhausted).await {
                Ok(rows) if rows.is_empty() => println!("No failed transactions."),
                Ok(rows) => {
                    for row in rows {
                        println!("{}", describe(&row));
                    }
                }
                Err(e) => eprintln!("Failed to list failed transactions: {e:#}"),
            }
            true
        }
        None => false,
    }
}

async fn publish(args: &PublishArgs) -> anyhow::Result<String> {
    let request = TransactionRequest {
        sender: args.sender.clone(),
        recipient: args.recipient.clone(),
        amount: args.amount,
    };
    request
        .validate()
        .map_err(|e| anyhow::anyhow!("Validation error: {e}"))?;

    let queue_name = args
        .queue
        .clone()
        .or_else(|| std::env::var("QUEUE_NAME").ok())
        .unwrap_or_else(|| DEFAULT_QUEUE.to_string());
    let queue = RequestQueue::connect(&get_env("RABBITMQ_URL")?, &queue_name).await?;
    let published = queue.publish(&request).await;
    queue.close().await;
    published.map(|_| queue_name)
}

async fn transaction_status(id: i32) -> anyhow::Result<Option<common::TransactionStatus>> {
    let db = Database::new(&get_env("DATABASE_URL")?).await?;
    let status = db.transaction_status(id).await;
    db.close().await;
    status
}

async fn failed_transactions(exhausted: bool) -> anyhow::Result<Vec<FailedAttempt>> {
    let db = Database::new(&get_env("DATABASE_URL")?).await?;
    let rows = if exhausted {
        db.list_exhausted().await
    } else {
        db.list_retryable().await
    };
    db.close().await;
    rows
}

fn describe(row: &FailedAttempt) -> String {
    format!(
        "#{} {} -> {} amount={} attempts={} created_at={} error={}",
        row.id, row.sender, row.recipient, row.amount, row.attempts, row.created_at, row.error
    )
}

/// Helper to fetch a required variable from the environment.
fn get_env(key: &str) -> anyhow::Result<String> {
    std::env::var(key).map_err(|e| anyhow::anyhow!("{key} environment variable not set: {e}"))
}
