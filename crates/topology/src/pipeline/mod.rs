//! Static front-end build pipeline.
//!
//! The build recipe is fixed: one toolchain (npm) with a single install and
//! build step, `build/**/*` as the artifact set and the dependency directory as
//! the cache. Every pipeline also carries the single-page-application fallback
//! so that deep links into client-side routes resolve to the root document.

mod build_spec;

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use serde::Serialize;

pub use build_spec::{BUILD_SPEC_VERSION, BuildSpec, BuildSpecBuilder};

use crate::{
    error::{Result, TopologyError},
    secret::{EnvValue, ResolvedSecrets, SecretRef, ensure_no_sensitive_literals},
};

/// Directory inside the repository holding the front end.
pub const APP_ROOT: &str = "frontend";
/// Build commands, in order.
pub const BUILD_COMMANDS: &[&str] = &["npm install", "npm run build"];
/// Directory the build writes its artifacts to.
pub const ARTIFACT_DIR: &str = "build";
/// Artifact globs collected from [`ARTIFACT_DIR`].
pub const ARTIFACT_GLOBS: &[&str] = &["**/*"];
/// Paths cached between builds.
pub const CACHE_PATHS: &[&str] = &["node_modules/**/*"];

/// Source pattern matching every path that is not a static asset.
pub const SPA_FALLBACK_SOURCE: &str =
    "</^[^.]+$|\\.(?!(css|gif|ico|jpg|js|png|txt|svg|woff|woff2|ttf|map|json|webp)$)([^.]+$)/>";
/// Document served for unmatched paths.
pub const SPA_FALLBACK_TARGET: &str = "/index.html";

/// Status the static host answers a redirect rule with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
pub enum RedirectStatus {
    /// Serve the target without changing the URL.
    #[serde(rename = "200")]
    #[strum(serialize = "200")]
    Rewrite,
    #[serde(rename = "301")]
    #[strum(serialize = "301")]
    Permanent,
    #[serde(rename = "302")]
    #[strum(serialize = "302")]
    Temporary,
    #[serde(rename = "404-200")]
    #[strum(serialize = "404-200")]
    NotFoundRewrite,
}

/// A redirect or rewrite rule evaluated by the static host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CustomRule {
    pub source: String,
    pub target: String,
    pub status: RedirectStatus,
}

impl CustomRule {
    /// Rewrite every non-asset path to the root document.
    pub fn spa_fallback() -> Self {
        Self {
            source: SPA_FALLBACK_SOURCE.to_string(),
            target: SPA_FALLBACK_TARGET.to_string(),
            status: RedirectStatus::Rewrite,
        }
    }
}

/// Mapping of a branch onto a subdomain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DomainMapping {
    pub branch: String,
    pub subdomain: String,
    pub domain: String,
}

impl DomainMapping {
    /// Fully qualified host name the branch is served on.
    pub fn fqdn(&self) -> String {
        format!("{}.{}", self.subdomain, self.domain)
    }
}

impl fmt::Display for DomainMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}→{}", self.branch, self.fqdn())
    }
}

/// A source-triggered static-site build and its hosting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildPipeline {
    pub source_owner: String,
    pub source_repo: String,
    pub auth_token: SecretRef,
    pub root_dir: String,
    pub build_commands: Vec<String>,
    pub artifact_dir: String,
    pub artifact_globs: BTreeSet<String>,
    pub cache_paths: BTreeSet<String>,
    pub branch_name: String,
    pub domain_name: String,
    pub subdomain_name: String,
    pub spa_fallback: bool,
    pub custom_rules: Vec<CustomRule>,
    /// Variables exposed to the build, e.g. the CAPTCHA site key.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, EnvValue>,
}

impl BuildPipeline {
    /// Describe the pipeline for `source_owner/source_repo`, serving
    /// `branch_name` on `subdomain_name.domain_name`.
    pub fn describe(
        source_owner: &str,
        source_repo: &str,
        auth_token: SecretRef,
        domain_name: &str,
        branch_name: &str,
        subdomain_name: &str,
    ) -> Result<Self> {
        validate_source(
            source_owner,
            source_repo,
            domain_name,
            branch_name,
            subdomain_name,
        )?;

        tracing::debug!(
            source = %format!("{source_owner}/{source_repo}"),
            branch = branch_name,
            domain = domain_name,
            subdomain = subdomain_name,
            "Describing build pipeline"
        );

        Ok(Self {
            source_owner: source_owner.to_string(),
            source_repo: source_repo.to_string(),
            auth_token,
            root_dir: APP_ROOT.to_string(),
            build_commands: BUILD_COMMANDS.iter().map(|c| c.to_string()).collect(),
            artifact_dir: ARTIFACT_DIR.to_string(),
            artifact_globs: ARTIFACT_GLOBS.iter().map(|g| g.to_string()).collect(),
            cache_paths: CACHE_PATHS.iter().map(|p| p.to_string()).collect(),
            branch_name: branch_name.to_string(),
            domain_name: domain_name.to_ascii_lowercase(),
            subdomain_name: subdomain_name.to_ascii_lowercase(),
            spa_fallback: true,
            custom_rules: vec![CustomRule::spa_fallback()],
            environment: BTreeMap::new(),
        })
    }

    /// Attach build-time environment variables.
    ///
    /// Literal values under sensitive names are rejected.
    pub fn with_environment(
        mut self,
        literals: &BTreeMap<String, String>,
        secrets: ResolvedSecrets,
    ) -> Result<Self> {
        ensure_no_sensitive_literals("build environment", literals.keys())?;

        for (name, value) in literals {
            self.environment
                .insert(name.clone(), EnvValue::Literal(value.clone()));
        }
        for (name, secret) in secrets.into_inner() {
            if self.environment.contains_key(&name) {
                return Err(TopologyError::invalid(
                    "build environment",
                    format!("{name} is defined both as a literal and as a secret"),
                ));
            }
            self.environment.insert(name, EnvValue::Secret(secret));
        }
        Ok(self)
    }

    /// The single branch to subdomain mapping.
    pub fn domain_mapping(&self) -> DomainMapping {
        DomainMapping {
            branch: self.branch_name.clone(),
            subdomain: self.subdomain_name.clone(),
            domain: self.domain_name.clone(),
        }
    }

    /// Build spec handed to the static host.
    pub fn build_spec(&self) -> BuildSpec {
        let mut builder = BuildSpecBuilder::new(&self.root_dir)
            .artifacts(&self.artifact_dir, &self.artifact_globs)
            .cache(&self.cache_paths);
        for command in &self.build_commands {
            builder = builder.command(command);
        }
        builder.build()
    }

    /// Repository in `owner/name` form.
    pub fn repository(&self) -> String {
        format!("{}/{}", self.source_owner, self.source_repo)
    }
}

/// Check the source binding and hosting inputs of [`BuildPipeline::describe`].
pub(crate) fn validate_source(
    source_owner: &str,
    source_repo: &str,
    domain_name: &str,
    branch_name: &str,
    subdomain_name: &str,
) -> Result<()> {
    require_non_empty("source owner", source_owner)?;
    require_non_empty("source repository", source_repo)?;
    validate_branch(branch_name)?;
    validate_domain(domain_name)?;
    validate_label("subdomain", subdomain_name)
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(TopologyError::invalid(field, "must not be empty"));
    }
    Ok(())
}

fn validate_branch(branch: &str) -> Result<()> {
    require_non_empty("branch", branch)?;
    if branch.chars().any(|c| c.is_whitespace() || c == '~' || c == '^' || c == ':') {
        return Err(TopologyError::invalid(
            "branch",
            format!("{branch} is not a valid branch name"),
        ));
    }
    Ok(())
}

/// A single DNS label: 1-63 alphanumerics or hyphens, no leading or trailing hyphen.
fn validate_label(field: &str, label: &str) -> Result<()> {
    let valid = !label.is_empty()
        && label.len() <= 63
        && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        && !label.starts_with('-')
        && !label.ends_with('-');
    if !valid {
        return Err(TopologyError::invalid(
            field,
            format!("{label:?} is not a valid DNS label"),
        ));
    }
    Ok(())
}

fn validate_domain(domain: &str) -> Result<()> {
    require_non_empty("domain", domain)?;
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || domain.len() > 253 {
        return Err(TopologyError::invalid(
            "domain",
            format!("{domain} is not a registrable domain name"),
        ));
    }
    labels
        .into_iter()
        .try_for_each(|label| validate_label("domain", label))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> SecretRef {
        SecretRef::new("github-personal-access-token", "ghp_abc123")
    }

    #[test]
    fn test_describe_example_domain() {
        let pipeline =
            BuildPipeline::describe("maxrchung", "FunctionalVote", token(), "example.com", "master", "app")
                .unwrap();

        assert!(pipeline.spa_fallback);
        assert_eq!(pipeline.custom_rules, vec![CustomRule::spa_fallback()]);
        assert_eq!(pipeline.domain_mapping().to_string(), "master→app.example.com");
        assert_eq!(pipeline.domain_mapping().fqdn(), "app.example.com");
        assert_eq!(pipeline.repository(), "maxrchung/FunctionalVote");
    }

    #[test]
    fn test_recipe_is_fixed() {
        let pipeline =
            BuildPipeline::describe("owner", "repo", token(), "example.com", "main", "www").unwrap();

        assert_eq!(pipeline.root_dir, "frontend");
        assert_eq!(pipeline.build_commands, vec!["npm install", "npm run build"]);
        assert_eq!(pipeline.artifact_dir, "build");
        assert!(pipeline.artifact_globs.contains("**/*"));
        assert!(pipeline.cache_paths.contains("node_modules/**/*"));

        let spec = pipeline.build_spec();
        assert_eq!(spec.app_root, "frontend");
        assert_eq!(spec.frontend.artifacts.base_directory, "build");
        assert_eq!(
            spec.frontend.phases.build.commands,
            vec!["npm install", "npm run build"]
        );
    }

    #[test]
    fn test_spa_fallback_rule() {
        let rule = CustomRule::spa_fallback();
        assert_eq!(rule.target, "/index.html");
        assert_eq!(rule.status, RedirectStatus::Rewrite);
        assert_eq!(rule.status.to_string(), "200");
        assert!(rule.source.contains("css"));
    }

    #[test]
    fn test_invalid_inputs() {
        let cases = [
            ("", "repo", "example.com", "master", "app"),
            ("owner", "repo", "localhost", "master", "app"),
            ("owner", "repo", "example.com", "", "app"),
            ("owner", "repo", "example.com", "feature branch", "app"),
            ("owner", "repo", "example.com", "master", "-app"),
            ("owner", "repo", "example.com", "master", "a.b"),
        ];

        for (owner, repo, domain, branch, subdomain) in cases {
            let err = BuildPipeline::describe(owner, repo, token(), domain, branch, subdomain)
                .unwrap_err();
            assert!(err.is_invalid_spec(), "expected invalid spec for {domain} {branch} {subdomain}");
        }
    }

    #[test]
    fn test_environment_rejects_sensitive_literals() {
        let pipeline =
            BuildPipeline::describe("owner", "repo", token(), "example.com", "master", "app").unwrap();
        let literals = BTreeMap::from([("RECAPTCHA_SECRET".to_string(), "abc".to_string())]);

        let err = pipeline
            .with_environment(&literals, ResolvedSecrets::empty())
            .unwrap_err();
        assert!(err.is_invalid_spec());
    }

    #[test]
    fn test_environment_literals() {
        let pipeline =
            BuildPipeline::describe("owner", "repo", token(), "example.com", "master", "app").unwrap();
        let literals = BTreeMap::from([
            ("NODE_ENV".to_string(), "production".to_string()),
            ("RECAPTCHA_PUBLIC_KEY".to_string(), "6Lc_site_key".to_string()),
        ]);

        let pipeline = pipeline
            .with_environment(&literals, ResolvedSecrets::empty())
            .unwrap();
        assert_eq!(
            pipeline.environment["NODE_ENV"],
            EnvValue::Literal("production".to_string())
        );
    }

    #[test]
    fn test_token_is_not_serialized() {
        let pipeline =
            BuildPipeline::describe("owner", "repo", token(), "example.com", "master", "app").unwrap();
        let json = serde_json::to_string(&pipeline).unwrap();
        assert!(json.contains("github-personal-access-token"));
        assert!(!json.contains("ghp_abc123"));
    }
}
