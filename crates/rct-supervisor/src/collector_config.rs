//! Collector configuration document regenerated before every collector start.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_OTLP_GRPC_ENDPOINT: &str = "localhost:4317";
const DEFAULT_FILE_EXPORT_PATH: &str = "./bin/log";
const DEFAULT_CREDENTIAL_ENV: &str = "OTEL_EXPORTER_API_KEY";
const DEFAULT_EXPORT_ENDPOINT: &str = "https://otlp.nr-data.net:4318";
const OTLP_RECEIVER: &str = "otlp";
const FILE_EXPORTER: &str = "file";
const OTLP_HTTP_EXPORTER: &str = "otlphttp";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Inputs for the generated collector configuration.
pub struct CollectorConfigSpec {
    pub otlp_grpc_endpoint: String,
    pub file_export_path: String,
    /// Environment variable holding the exporter credential.
    pub credential_env: String,
    pub export_endpoint: String,
}

impl Default for CollectorConfigSpec {
    fn default() -> Self {
        Self {
            otlp_grpc_endpoint: DEFAULT_OTLP_GRPC_ENDPOINT.to_string(),
            file_export_path: DEFAULT_FILE_EXPORT_PATH.to_string(),
            credential_env: DEFAULT_CREDENTIAL_ENV.to_string(),
            export_endpoint: DEFAULT_EXPORT_ENDPOINT.to_string(),
        }
    }
}

impl CollectorConfigSpec {
    /// Reads the credential from the configured environment variable. Blank values count as unset.
    pub fn resolve_credential(&self) -> Option<String> {
        std::env::var(&self.credential_env)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorConfigDocument {
    pub receivers: ReceiversSection,
    pub exporters: ExportersSection,
    pub service: ServiceSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiversSection {
    pub otlp: OtlpReceiver,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtlpReceiver {
    pub protocols: OtlpProtocols,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtlpProtocols {
    pub grpc: EndpointSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSection {
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportersSection {
    pub file: FileExporter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otlphttp: Option<OtlpHttpExporter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileExporter {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtlpHttpExporter {
    pub endpoint: String,
    pub headers: CredentialHeaders,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialHeaders {
    #[serde(rename = "api-key")]
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSection {
    pub pipelines: PipelinesSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelinesSection {
    pub metrics: PipelineSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSection {
    pub receivers: Vec<String>,
    pub exporters: Vec<String>,
}

/// Builds the collector document. The credential exporter is declared only when a credential exists.
pub fn build_collector_config_document(
    spec: &CollectorConfigSpec,
    credential: Option<String>,
) -> CollectorConfigDocument {
    let mut exporters = vec![FILE_EXPORTER.to_string()];
    let otlphttp = credential.map(|api_key| {
        exporters.push(OTLP_HTTP_EXPORTER.to_string());
        OtlpHttpExporter {
            endpoint: spec.export_endpoint.clone(),
            headers: CredentialHeaders { api_key },
        }
    });

    CollectorConfigDocument {
        receivers: ReceiversSection {
            otlp: OtlpReceiver {
                protocols: OtlpProtocols {
                    grpc: EndpointSection {
                        endpoint: spec.otlp_grpc_endpoint.clone(),
                    },
                },
            },
        },
        exporters: ExportersSection {
            file: FileExporter {
                path: spec.file_export_path.clone(),
            },
            otlphttp,
        },
        service: ServiceSection {
            pipelines: PipelinesSection {
                metrics: PipelineSection {
                    receivers: vec![OTLP_RECEIVER.to_string()],
                    exporters,
                },
            },
        },
    }
}

pub fn render_collector_config(
    spec: &CollectorConfigSpec,
    credential: Option<String>,
) -> Result<String, serde_yaml::Error> {
    serde_yaml::to_string(&build_collector_config_document(spec, credential))
}

/// Failures while regenerating the collector config file.
#[derive(Debug, Error)]
pub enum CollectorConfigError {
    #[error("failed to render collector config")]
    Render(#[from] serde_yaml::Error),
    #[error("collector config destination '{}' is a directory", path.display())]
    DestinationIsDirectory { path: PathBuf },
    #[error("failed to create collector config directory '{}'", path.display())]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to stage collector config at '{}'", path.display())]
    Stage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to replace collector config '{}'", path.display())]
    Replace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Regenerates the config file at `path`, replacing any previous content.
///
/// Returns whether the exporter credential was present. The collector only
/// ever sees a complete document: the new content is staged next to `path`
/// and renamed over it.
pub(crate) fn write_collector_config(
    spec: &CollectorConfigSpec,
    path: &Path,
) -> Result<bool, CollectorConfigError> {
    let credential = spec.resolve_credential();
    let has_credential = credential.is_some();
    let rendered = render_collector_config(spec, credential)?;
    replace_collector_config(path, &rendered)?;
    Ok(has_credential)
}

fn replace_collector_config(path: &Path, rendered: &str) -> Result<(), CollectorConfigError> {
    if path.is_dir() {
        return Err(CollectorConfigError::DestinationIsDirectory {
            path: path.to_path_buf(),
        });
    }
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&directory).map_err(|source| CollectorConfigError::CreateDirectory {
        path: directory.clone(),
        source,
    })?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "otel-config.yaml".to_string());
    let staged = directory.join(format!(".{file_name}.{}.staged", std::process::id()));
    let staged_write = fs::File::create(&staged).and_then(|mut file| {
        file.write_all(rendered.as_bytes())?;
        file.sync_all()
    });
    if let Err(source) = staged_write {
        let _ = fs::remove_file(&staged);
        return Err(CollectorConfigError::Stage {
            path: staged,
            source,
        });
    }
    fs::rename(&staged, path).map_err(|source| {
        let _ = fs::remove_file(&staged);
        CollectorConfigError::Replace {
            path: path.to_path_buf(),
            source,
        }
    })
}
