use anyhow::Context;
use modelgate_core::config::WarnLevel;
use std::path::Path;

pub fn run(config_path: Option<&Path>, listen: Option<String>) -> anyhow::Result<()> {
    let mut config = super::load_config(config_path)?;
    if let Some(listen) = listen {
        config.listen = listen;
    }

    let warnings = config.validate();
    for w in &warnings {
        match w.level {
            WarnLevel::Warning => tracing::warn!("{}", w.message),
            WarnLevel::Error => tracing::error!("{}", w.message),
        }
    }
    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("refusing to start with an invalid config (see `modelgate config validate`)");
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&config.listen)
            .await
            .with_context(|| format!("cannot bind {}", config.listen))?;
        modelgate_server::serve_on(config, listener).await
    })
}
