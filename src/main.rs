/// DID agent
///
/// Network service that admits, verifies and stores DID documents.
use did_agent::{config::AgentConfig, context::AppContext, error::AgentResult, server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> AgentResult<()> {
    dotenv::dotenv().ok();

    // Initialize logging
    let json = matches!(std::env::var("AGENT_LOG_FORMAT").as_deref(), Ok("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "did_agent=debug,tower_http=debug".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();

    print_banner();

    let config = AgentConfig::from_env()?;
    let ctx = AppContext::new(config).await?;

    server::serve(ctx).await?;

    Ok(())
}

fn print_banner() {
    println!(
        r#"
        did-agent v{}
        proof-of-work gated DID document service
        "#,
        env!("CARGO_PKG_VERSION")
    );
}
