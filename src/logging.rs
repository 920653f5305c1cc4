//! Registro estructurado con `tracing`. Nivel por `RUST_LOG`; si no está
//! definido, `info` (o `debug` con `--verbose`).

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Instala el suscriptor global. Llamadas posteriores no hacen nada.
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr),
    );
    let _ = tracing::subscriber::set_global_default(subscriber);
}
