use std::sync::Arc;

use oauth2_middleware::{
    grant_types::{ClientCredentialsConfig, ClientCredentialsGrant},
    Oauth2Client, Oauth2Middleware, RetryPolicy,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> oauth2_middleware::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Grant configuration is validated eagerly. Missing keys are reported together.
    let grant = ClientCredentialsGrant::new(
        ClientCredentialsConfig::builder()
            .client_id("my-client-id")
            .client_secret("my-client-secret")
            .token_url("https://identity.example.com/oauth2/token")
            .scope("my-scope")
            .build(),
    )?;

    // Reuse an existing reqwest Client for token requests.
    let reqwest_client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| oauth2_middleware::Error::Transport(Arc::new(e)))?;
    let client = Oauth2Client::with_transport(grant, Arc::new(reqwest_client));

    // Tokens are cached until they expire. A request rejected with 401 or 403
    // is retried once with a fresh token.
    let middleware = Oauth2Middleware::new(client).set_retry_policy(
        RetryPolicy::builder()
            .statuses([401, 403])
            .match_invalid_token(true)
            .build(),
    );

    let response = middleware.get("https://api.example.com/data").await?;
    println!(
        "{}: {}",
        response.status(),
        String::from_utf8_lossy(response.body())
    );
    Ok(())
}
