//! Service and region resolution for the credential scope

/// Service used when the host does not identify one
pub const DEFAULT_SERVICE: &str = "lambda";

/// Region used when the host does not identify one
pub const DEFAULT_REGION: &str = "us-east-1";

/// Service and region a request is signed for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningScope {
    pub service: String,
    pub region: String,
}

impl Default for SigningScope {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE, DEFAULT_REGION)
    }
}

impl SigningScope {
    pub fn new(service: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            region: region.into(),
        }
    }

    /// Infer the scope from an endpoint host name
    ///
    /// Recognizes Lambda Function URLs (`<id>.lambda-url.<region>.on.aws`) and
    /// regular service endpoints (`<service>.<region>.amazonaws.com`).
    pub fn infer(host: &str) -> Self {
        let host = host.trim_end_matches('.').to_ascii_lowercase();

        if let Some(rest) = host.strip_suffix(".on.aws") {
            let labels: Vec<&str> = rest.split('.').collect();
            return match labels.as_slice() {
                [_, "lambda-url", region] => Self::new("lambda", *region),
                _ => Self::default(),
            };
        }

        let host = host.strip_suffix(".cn").unwrap_or(&host);
        if let Some(rest) = host.strip_suffix(".amazonaws.com") {
            let labels: Vec<&str> = rest.split('.').filter(|l| *l != "dualstack").collect();
            return match labels.as_slice() {
                [.., service, region] if is_region(region) => Self::new(*service, *region),
                [.., service] if !service.is_empty() => Self::new(*service, DEFAULT_REGION),
                _ => Self::default(),
            };
        }

        Self::default()
    }

    /// Replace the inferred values with explicit overrides
    pub fn with_overrides(mut self, service: Option<&str>, region: Option<&str>) -> Self {
        if let Some(service) = service {
            self.service = service.to_string();
        }
        if let Some(region) = region {
            self.region = region.to_string();
        }
        self
    }
}

/// `us-east-1`, `ap-southeast-2`, `us-gov-west-1`, ...
fn is_region(label: &str) -> bool {
    label.split('-').count() >= 3 && label.ends_with(|c: char| c.is_ascii_digit())
}
