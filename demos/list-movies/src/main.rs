use std::sync::Arc;

use movies_client::{
    CallContext, ClientConfig, MovieApi, MovieApiClient, StaticTokenSource,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), movies_client::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // MOVIES_API_BASE_URL and MOVIES_IDP_AUTHORITY are required.
    let config = ClientConfig::from_env()?;
    let token = std::env::var("MOVIES_ACCESS_TOKEN").unwrap_or_default();
    let client = MovieApiClient::new(&config, Arc::new(StaticTokenSource::new(&token)?))?;

    let ctx = CallContext::anonymous();
    for movie in client.list_movies(&ctx).await? {
        println!(
            "{:>4}  {:<40} {:<12} {}  ({})",
            movie.id,
            movie.title,
            movie.genre,
            movie.release_date.date(),
            movie.owner
        );
    }

    for (claim_type, value) in client.user_info(&ctx).await?.collapsed() {
        println!("{claim_type}: {value}");
    }

    Ok(())
}
