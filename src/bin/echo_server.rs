//! Example server: a `chat` broadcast channel plus a couple of actions,
//! wired up the way an application built on this crate is expected to look.

use std::sync::Arc;

use anyhow::Result;
use socketapi::{FnHandler, HandlerFuture, Param, ServerConfig, Server, SocketApi};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let app = SocketApi::new();

    let chat = Arc::new(FnHandler::new(
        "chat",
        vec![Param::str("message")],
        |args| -> HandlerFuture {
            Box::pin(async move {
                let message = args
                    .get("message")
                    .cloned()
                    .unwrap_or_else(|| serde_json::json!("Welcome"));
                Ok(serde_json::json!({ "message": message }))
            })
        },
    ));
    app.channel("chat", true, chat).await?;

    let simple_action = Arc::new(FnHandler::new(
        "simple_action",
        vec![Param::int("x")],
        |args| -> HandlerFuture {
            Box::pin(async move {
                let x = args["x"].as_i64().expect("validated int");
                Ok(serde_json::json!(x + 1))
            })
        },
    ));
    app.action("simple_action", simple_action).await?;

    let config = ServerConfig::new("127.0.0.1:8765".parse()?);
    let server = Server::start(config, app).await?;
    log::info!("echo server listening on {}", server.local_addr());

    std::future::pending::<()>().await;
    Ok(())
}
