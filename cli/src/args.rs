use clap::{Args as ClapArgs, Parser, Subcommand};
use rust_decimal::Decimal;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Payment processor - consumes payment requests, initiates M-Pesa payments and retries failures"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Publish a payment request to the queue (for testing only)
    ///
    /// Sends one request as a persistent message, exactly as an upstream
    /// producer would.
    Publish(PublishArgs),

    /// Print the status of a recorded transaction
    Status(StatusArgs),

    /// List failed transactions
    ///
    /// By default lists the rows the retry scheduler will pick up on its next
    /// cycle. With --exhausted lists the rows that used up their retry budget.
    Failed(FailedArgs),
}

#[derive(ClapArgs, Debug)]
pub struct PublishArgs {
    /// Payer phone number, e.g. 254712345678
    #[arg(short, long, help = "Payer phone number")]
    pub sender: String,

    /// Recipient identifier
    #[arg(short, long, help = "Recipient identifier")]
    pub recipient: String,

    /// Amount in currency units
    #[arg(short, long, help = "Amount in currency units")]
    pub amount: Decimal,

    /// Queue name (defaults to QUEUE_NAME or `transactions`)
    #[arg(short, long, help = "Queue to publish to")]
    pub queue: Option<String>,
}

#[derive(ClapArgs, Debug)]
pub struct StatusArgs {
    /// Transaction id
    pub id: i32,
}

#[derive(ClapArgs, Debug)]
pub struct FailedArgs {
    /// List exhausted rows instead of retryable ones
    #[arg(short, long, help = "List rows whose retry budget is used up")]
    pub exhausted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn no_subcommand_means_run_service() {
        let args = Args::try_parse_from(["payment_processor"]).unwrap();
        assert!(args.command.is_none());
    }

    #[test]
    fn publish_parses_decimal_amount() {
        let args = Args::try_parse_from([
            "payment_processor",
            "publish",
            "--sender",
            "254712345678",
            "--recipient",
            "merchant-001",
            "--amount",
            "500.00",
        ])
        .unwrap();
        match args.command {
            Some(Commands::Publish(publish)) => {
                assert_eq!(publish.amount, Decimal::new(50000, 2));
                assert!(publish.queue.is_none());
            }
            other => panic!("expected publish, got {:?}", other),
        }
    }

    #[test]
    fn failed_accepts_exhausted_flag() {
        let args = Args::try_parse_from(["payment_processor", "failed", "--exhausted"]).unwrap();
        assert!(matches!(
            args.command,
            Some(Commands::Failed(FailedArgs { exhausted: true }))
        ));
    }
}
