//! Loopback negotiation demo.
//!
//! Runs an issuer and a set of clients in one process over loopback channels,
//! logging each issued token.
//!
//! # Usage
//!
//! ```bash
//! # Eight clients, challenge/response, renew each token once
//! parley-demo --clients 8 --protocol challenge --renew
//!
//! # Trace every leg
//! RUST_LOG=parley_client=debug,parley_server=debug parley-demo
//! ```

use std::{sync::Arc, time::Duration};

use clap::{Parser, ValueEnum};
use parley_client::{
    ChallengeNegotiation, EntropyNegotiation, IssuanceError, NegotiationStrategy, ProviderConfig,
    SessionTokenProvider,
};
use parley_core::{Environment, IdentityEvidence, StoreConfig};
use parley_crypto::SymmetricKey;
use parley_harness::{LoopbackConfig, LoopbackFactory};
use parley_server::{
    AuthenticatorConfig, ChallengeResponse, EntropyExchange, InMemoryClaimsResolver,
    InMemoryCredentialStore, NegotiationService, ServerNegotiationAuthenticator,
    ServerNegotiationProtocol, SystemEnv, run_idle_reaper,
};
use tokio::sync::oneshot;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const ISSUER: &str = "urn:parley:demo-issuer";

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Protocol {
    /// Single-leg entropy exchange
    Entropy,
    /// Two-leg challenge/response with pre-shared credentials
    Challenge,
}

/// Parley loopback negotiation demo
#[derive(Parser, Debug)]
#[command(name = "parley-demo")]
#[command(about = "Negotiate session tokens against an in-process issuer")]
#[command(version)]
struct Args {
    /// Number of concurrent clients
    #[arg(short, long, default_value = "4")]
    clients: usize,

    /// Negotiation protocol
    #[arg(short, long, value_enum, default_value = "entropy")]
    protocol: Protocol,

    /// One-way latency per request in milliseconds
    #[arg(long, default_value = "5")]
    latency_ms: u64,

    /// Per-negotiation timeout in seconds
    #[arg(long, default_value = "10")]
    timeout_secs: u64,

    /// Issuer concurrency cap
    #[arg(long, default_value = "128")]
    max_concurrent: usize,

    /// Maximum negotiations held between legs
    #[arg(long, default_value = "128")]
    max_pending: usize,

    /// Issue self-contained cookie tokens instead of caching on the issuer
    #[arg(long)]
    cookie_mode: bool,

    /// Renew every token once after issuance
    #[arg(long)]
    renew: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let env = SystemEnv::new();
    let config = AuthenticatorConfig {
        store: StoreConfig { max_entries: args.max_pending, ..Default::default() },
        cookie_mode: args.cookie_mode,
        max_concurrent_negotiations: args.max_concurrent,
        ..Default::default()
    };

    tracing::info!(
        clients = args.clients,
        protocol = ?args.protocol,
        cookie_mode = args.cookie_mode,
        "Parley demo starting"
    );

    match args.protocol {
        Protocol::Entropy => {
            let mut resolver = InMemoryClaimsResolver::new();
            for client in 0..args.clients {
                resolver = resolver.with_user(principal(client), &["demo"]);
            }
            let protocol = EntropyExchange::new(resolver);
            run(&args, env, protocol, config, |client| {
                EntropyNegotiation::new(IdentityEvidence::UserName(principal(client)))
            })
            .await
        },
        Protocol::Challenge => {
            let credentials = InMemoryCredentialStore::new();
            let keys: Vec<SymmetricKey> = (0..args.clients)
                .map(|client| {
                    let key = SymmetricKey::from_bytes(env.random_array::<32>().to_vec());
                    credentials.insert(principal(client), key.clone());
                    key
                })
                .collect();
            let protocol = ChallengeResponse::new(credentials);
            run(&args, env, protocol, config, |client| {
                ChallengeNegotiation::new(principal(client), keys[client].clone())
            })
            .await
        },
    }
}

fn principal(client: usize) -> String {
    format!("client-{client}")
}

async fn run<P, S>(
    args: &Args,
    env: SystemEnv,
    protocol: P,
    config: AuthenticatorConfig,
    strategy_for: impl Fn(usize) -> S,
) -> Result<(), Box<dyn std::error::Error>>
where
    P: ServerNegotiationProtocol,
    S: NegotiationStrategy + 'static,
{
    let authenticator =
        Arc::new(ServerNegotiationAuthenticator::new(env.clone(), protocol, config)?);
    let service = NegotiationService::new(Arc::clone(&authenticator));

    let (stop, stopped) = oneshot::channel::<()>();
    let reaper = tokio::spawn(run_idle_reaper(Arc::clone(&authenticator), async {
        let _ = stopped.await;
    }));

    let loopback =
        LoopbackConfig { latency: Duration::from_millis(args.latency_ms), ..Default::default() };
    let timeout = Duration::from_secs(args.timeout_secs);
    let client_config = ProviderConfig::default();

    let mut tasks = Vec::with_capacity(args.clients);
    for client in 0..args.clients {
        let factory = LoopbackFactory::new(service.clone(), env.clone(), loopback.clone());
        let provider = SessionTokenProvider::new(
            env.clone(),
            factory,
            strategy_for(client),
            ISSUER,
            ISSUER,
            client_config.clone(),
        )?;
        let renew = args.renew;

        tasks.push(tokio::spawn(async move {
            let token = provider.issue_token(timeout).await?;
            tracing::info!(
                client,
                context = token.context_id(),
                generation = token.key_generation(),
                claims = token.claims().len(),
                cookie = token.is_cookie_mode(),
                "token issued"
            );

            if renew {
                let renewed = provider.renew_token(&token, timeout).await?;
                let accepted = provider.incoming_tokens(provider.driver().env().wall_clock());
                tracing::info!(
                    client,
                    context = renewed.context_id(),
                    generation = renewed.key_generation(),
                    accepted_keys = accepted.len(),
                    "token renewed"
                );
            }
            Ok::<_, IssuanceError>(())
        }));
    }

    let mut failures = 0usize;
    for task in tasks {
        match task.await {
            Ok(Ok(())) => {},
            Ok(Err(err)) => {
                failures += 1;
                tracing::error!(error = %err, transient = err.is_transient(), "client failed");
            },
            Err(err) => {
                failures += 1;
                tracing::error!(error = %err, "client task panicked");
            },
        }
    }

    let _ = stop.send(());
    reaper.await?;

    tracing::info!(
        clients = args.clients,
        failures,
        cached = authenticator.cache().len(),
        pending = authenticator.pending_negotiations(),
        "Parley demo finished"
    );
    Ok(())
}
