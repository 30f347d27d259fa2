//! Build specification document for the static host.

use serde::Serialize;

use crate::error::{Result, TopologyError};

/// Build spec schema version understood by the static host.
pub const BUILD_SPEC_VERSION: &str = "1.0";

/// Build specification consumed by the static host's build runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSpec {
    pub version: String,
    pub app_root: String,
    pub frontend: FrontendPhases,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrontendPhases {
    pub phases: Phases,
    pub artifacts: Artifacts,
    pub cache: Cache,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Phases {
    pub build: Commands,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Commands {
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifacts {
    pub base_directory: String,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cache {
    pub paths: Vec<String>,
}

impl BuildSpec {
    /// Render as pretty JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|err| TopologyError::invalid("build spec", err.to_string()))
    }
}

/// Builder for a [`BuildSpec`].
#[derive(Debug, Clone)]
pub struct BuildSpecBuilder {
    app_root: String,
    commands: Vec<String>,
    base_directory: String,
    files: Vec<String>,
    cache_paths: Vec<String>,
}

impl BuildSpecBuilder {
    /// Create a builder rooted at `app_root`.
    pub fn new(app_root: impl Into<String>) -> Self {
        Self {
            app_root: app_root.into(),
            commands: Vec::new(),
            base_directory: String::new(),
            files: Vec::new(),
            cache_paths: Vec::new(),
        }
    }

    /// Append a build command.
    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.commands.push(command.into());
        self
    }

    /// Set the artifact base directory and the globs collected from it.
    pub fn artifacts(
        mut self,
        base_directory: impl Into<String>,
        files: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.base_directory = base_directory.into();
        self.files = files.into_iter().map(Into::into).collect();
        self
    }

    /// Add cached paths.
    pub fn cache(mut self, paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.cache_paths.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> BuildSpec {
        BuildSpec {
            version: BUILD_SPEC_VERSION.to_string(),
            app_root: self.app_root,
            frontend: FrontendPhases {
                phases: Phases {
                    build: Commands {
                        commands: self.commands,
                    },
                },
                artifacts: Artifacts {
                    base_directory: self.base_directory,
                    files: self.files,
                },
                cache: Cache {
                    paths: self.cache_paths,
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_spec_shape() {
        let spec = BuildSpecBuilder::new("frontend")
            .command("npm install")
            .command("npm run build")
            .artifacts("build", ["**/*"])
            .cache(["node_modules/**/*"])
            .build();

        let json: serde_json::Value = serde_json::from_str(&spec.to_json_pretty().unwrap()).unwrap();

        assert_eq!(json["version"], "1.0");
        assert_eq!(json["appRoot"], "frontend");
        assert_eq!(
            json["frontend"]["phases"]["build"]["commands"],
            serde_json::json!(["npm install", "npm run build"])
        );
        assert_eq!(json["frontend"]["artifacts"]["baseDirectory"], "build");
        assert_eq!(json["frontend"]["artifacts"]["files"][0], "**/*");
        assert_eq!(json["frontend"]["cache"]["paths"][0], "node_modules/**/*");
    }
}
