//! Runs swaps between two simulated ledgers and prints the outcome.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueHint};
use ethers::types::U256;
use log::info;
use swap_protocol::{
    cross_chain::{FillSecret, SwapOutcome},
    data_structures::Side,
    hashlock::Secret,
    test_utils::{
        fast_config, maker_address, maker_wallet, order_for, resolver_address, standard_secret,
        SwapEnv, DST_TOKEN, MAKING_AMOUNT, SRC_TOKEN,
    },
    SwapConfig,
};

#[derive(Parser)]
#[command(name = "swap-demo")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON config; defaults to fast polling against fresh ledgers.
    #[arg(short, long, value_parser, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Both legs deploy and the secret is revealed.
    Happy,
    /// The secret is withheld; both escrows refund after their time-locks.
    Timeout,
    /// Several independent orders at once.
    Concurrent {
        #[arg(short, long, default_value_t = 3)]
        count: u8,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => SwapConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => fast_config(),
    };
    // The simulated ledgers only fund the fixture resolver.
    config.resolver = resolver_address();

    env_logger::Builder::new()
        .filter_level(config.log_level)
        .parse_default_env()
        .init();

    let env = SwapEnv::with_config(config).await;
    match cli.command {
        Commands::Happy => {
            let signed = env.signed_order().await;
            let outcome = env
                .coordinator
                .execute(signed, standard_secret().into(), U256::from(MAKING_AMOUNT))
                .await?;
            report(&env, &outcome).await;
        }
        Commands::Timeout => {
            let signed = env.signed_order().await;
            let c = &env.coordinator;
            let ctx = c.register(signed.clone(), signed.order.making_amount).await?;
            let (ctx, _) = c.deploy_source(&ctx).await?;
            c.deploy_destination(&ctx).await?;
            info!("secret withheld, waiting for cancellation windows");
            let outcome = c.recover(signed.order_hash()).await?;
            report(&env, &outcome).await;
        }
        Commands::Concurrent { count } => {
            let mut fills = Vec::new();
            for i in 0..count {
                let secret = Secret::new([0x40u8.wrapping_add(i); 32]);
                let signed = order_for(&secret, 1_000 + u64::from(i))
                    .sign(&maker_wallet())
                    .await?;
                fills.push((signed, FillSecret::from(secret), U256::from(MAKING_AMOUNT)));
            }
            for outcome in env.coordinator.execute_all(fills).await {
                report(&env, &outcome?).await;
            }
        }
    }
    Ok(())
}

async fn report(env: &SwapEnv, outcome: &SwapOutcome) {
    match outcome {
        SwapOutcome::Completed { order_hash, notes, .. } => {
            println!("swap {order_hash:?} completed");
            for note in notes {
                println!("  note: {note}");
            }
        }
        SwapOutcome::Cancelled {
            order_hash,
            reason,
            refunds,
            ..
        } => {
            println!("swap {order_hash:?} cancelled ({reason}), {} refunds", refunds.len());
        }
    }
    let config = env.coordinator.config();
    println!(
        "  maker: {} source token, {} destination token",
        env.balance(Side::Src, maker_address(), SRC_TOKEN).await,
        env.balance(Side::Dst, maker_address(), DST_TOKEN).await
    );
    println!(
        "  resolver {:?}: {} source token on chain {}, {} destination token on chain {}",
        config.resolver,
        env.balance(Side::Src, config.resolver, SRC_TOKEN).await,
        config.source.chain_id,
        env.balance(Side::Dst, config.resolver, DST_TOKEN).await,
        config.destination.chain_id
    );
}
