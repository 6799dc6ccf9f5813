use crate::config::ConverterConfig;
use crate::services::converter::{KeyConverter, PuttygenConverter};
use std::sync::Arc;
use tracing::info;

pub async fn setup_converter(config: &ConverterConfig) -> Arc<dyn KeyConverter> {
    let converter = PuttygenConverter::new(&config.converter_program);

    // Probe once so a missing binary shows up at boot rather than on first upload
    if converter.health_check().await {
        info!(
            "🔑 Key converter available: {}",
            config.converter_program.display()
        );
    } else {
        tracing::warn!(
            "⚠️  Key converter '{}' did not answer --version. Conversions will fail until it is installed.",
            config.converter_program.display()
        );
    }

    Arc::new(converter)
}
