//! Label parsing — from orchestrator labels to a `ServiceRecord`.
//!
//! A managed service carries `<prefix>protocol`, `<prefix>domain` and
//! `<prefix>port`, or `<prefix>domain` plus a `target`/`forward` proxy
//! option. Proxy options are any prefixed label with an option marker
//! segment (`opt`, `opts`, `option`, `options`); the option key is the
//! label's last segment, so `agassi.opt.target` yields `target`.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use agassi_store::{Protocol, ServiceRecord};
use regex::Regex;
use tracing::warn;

use crate::descriptor::ServiceDescriptor;
use crate::error::LabelValidationError;

/// Labels every fully described service must carry.
pub const REQUISITE_LABELS: [&str; 3] = ["protocol", "domain", "port"];

static OPTION_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^opt(?:ions?|s)?$").expect("option marker regex"));

/// Label naming scheme.
#[derive(Debug, Clone)]
pub struct LabelConfig {
    pub prefix: String,
    pub separator: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            prefix: "agassi.".to_string(),
            separator: ".".to_string(),
        }
    }
}

impl LabelConfig {
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }
}

/// How a descriptor's labels classify it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Management {
    Managed,
    /// No agassi labels at all (or none of the requisite ones).
    Unmanaged,
    /// Some requisite labels present, these missing.
    Partial(Vec<String>),
}

/// Parsed labels of one descriptor.
#[derive(Debug, Clone)]
pub struct ServiceLabels<'a> {
    config: &'a LabelConfig,
    labels: HashMap<String, String>,
}

impl<'a> ServiceLabels<'a> {
    pub fn parse(config: &'a LabelConfig, descriptor: &ServiceDescriptor) -> Self {
        Self {
            config,
            labels: descriptor.merged_labels(),
        }
    }

    /// The value of `<prefix><name>`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.labels.get(&self.config.key(name)).map(String::as_str)
    }

    /// Proxy options carried by option-marked labels.
    pub fn options(&self) -> BTreeMap<String, String> {
        let sep = self.config.separator.as_str();
        self.labels
            .iter()
            .filter_map(|(key, value)| {
                let rest = key.strip_prefix(&self.config.prefix)?;
                let segments: Vec<&str> = rest.split(sep).collect();
                let (last, scope) = segments.split_last()?;
                if last.is_empty() || !scope.iter().any(|s| OPTION_MARKER.is_match(s)) {
                    return None;
                }
                Some((last.to_string(), value.clone()))
            })
            .collect()
    }

    pub fn missing(&self) -> Vec<String> {
        REQUISITE_LABELS
            .iter()
            .filter(|name| self.get(name).is_none())
            .map(|name| name.to_string())
            .collect()
    }

    pub fn classify(&self) -> Management {
        if self.labels.is_empty() {
            return Management::Unmanaged;
        }
        let missing = self.missing();
        if missing.is_empty() {
            return Management::Managed;
        }
        if missing.len() == REQUISITE_LABELS.len() {
            return Management::Unmanaged;
        }

        let options = self.options();
        let routed_manually = options.contains_key("target") || options.contains_key("forward");
        if self.get("domain").is_some() && routed_manually {
            return Management::Managed;
        }
        Management::Partial(missing)
    }

    /// Build the record for `descriptor`, or say why it cannot be built.
    pub fn to_record(&self, descriptor: &ServiceDescriptor) -> Result<ServiceRecord, LabelValidationError> {
        let domain = self
            .get("domain")
            .ok_or_else(|| LabelValidationError::MissingLabels(vec!["domain".to_string()]))?;

        let protocol = self
            .get("protocol")
            .map(|p| p.parse::<Protocol>().map_err(LabelValidationError::UnknownProtocol))
            .transpose()?;
        let port = self
            .get("port")
            .map(|p| {
                p.trim()
                    .parse::<u16>()
                    .map_err(|_| LabelValidationError::InvalidPort(p.to_string()))
            })
            .transpose()?;

        Ok(ServiceRecord {
            id: descriptor.id.clone(),
            domain: domain.to_string(),
            protocol,
            hostname: descriptor.hostname().to_string(),
            port,
            auth: self.get("auth").map(String::from),
            options: self.options(),
        })
    }
}

/// Whether agassi should route and certify this service.
///
/// Partially labelled services are rejected with one warning per
/// missing label.
pub fn is_managed_service(config: &LabelConfig, descriptor: &ServiceDescriptor) -> bool {
    match ServiceLabels::parse(config, descriptor).classify() {
        Management::Managed => true,
        Management::Unmanaged => false,
        Management::Partial(missing) => {
            for label in &missing {
                warn!(service = %descriptor.id, %label, "service is missing requisite label");
            }
            false
        }
    }
}

/// Validate a descriptor and build its record.
pub fn validate(
    config: &LabelConfig,
    descriptor: &ServiceDescriptor,
) -> Result<ServiceRecord, LabelValidationError> {
    let labels = ServiceLabels::parse(config, descriptor);
    match labels.classify() {
        Management::Managed => labels.to_record(descriptor),
        Management::Unmanaged => Err(LabelValidationError::MissingLabels(labels.missing())),
        Management::Partial(missing) => Err(LabelValidationError::MissingLabels(missing)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tracing::field::{Field, Visit};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    use super::*;

    fn descriptor(labels: &[(&str, &str)]) -> ServiceDescriptor {
        let mut d = ServiceDescriptor {
            id: "svc1".to_string(),
            ..Default::default()
        };
        d.spec.name = "stack_web".to_string();
        d.spec.labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        d
    }

    fn full() -> ServiceDescriptor {
        descriptor(&[
            ("agassi.protocol", "https"),
            ("agassi.domain", "a.example.com"),
            ("agassi.port", "8443"),
        ])
    }

    #[test]
    fn full_label_set_is_managed() {
        let config = LabelConfig::default();
        assert!(is_managed_service(&config, &full()));
    }

    #[test]
    fn missing_port_is_partial_with_one_label() {
        let config = LabelConfig::default();
        let mut d = full();
        d.spec.labels.remove("agassi.port");

        let labels = ServiceLabels::parse(&config, &d);
        assert_eq!(labels.classify(), Management::Partial(vec!["port".to_string()]));
        assert!(!is_managed_service(&config, &d));
    }

    /// Records the fields of every WARN event.
    #[derive(Clone, Default)]
    struct Warnings(Arc<Mutex<Vec<String>>>);

    impl<S: Subscriber> Layer<S> for Warnings {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() != Level::WARN {
                return;
            }
            let mut fields = Fields::default();
            event.record(&mut fields);
            self.0.lock().unwrap().push(fields.0);
        }
    }

    #[derive(Default)]
    struct Fields(String);

    impl Visit for Fields {
        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            self.0.push_str(&format!("{}={:?} ", field.name(), value));
        }
    }

    #[test]
    fn missing_port_warns_once_naming_port() {
        let config = LabelConfig::default();
        let mut d = full();
        d.spec.labels.remove("agassi.port");

        let warnings = Warnings::default();
        let subscriber = tracing_subscriber::registry().with(warnings.clone());
        let managed = tracing::subscriber::with_default(subscriber, || is_managed_service(&config, &d));

        assert!(!managed);
        let seen = warnings.0.lock().unwrap().clone();
        assert_eq!(seen.len(), 1, "{seen:?}");
        assert!(seen[0].contains("label=port"), "{seen:?}");
        assert!(seen[0].contains("service=svc1"), "{seen:?}");
    }

    #[test]
    fn unlabelled_and_foreign_labels_are_unmanaged() {
        let config = LabelConfig::default();
        assert!(!is_managed_service(&config, &descriptor(&[])));

        let foreign = descriptor(&[("com.docker.stack.namespace", "web")]);
        assert_eq!(
            ServiceLabels::parse(&config, &foreign).classify(),
            Management::Unmanaged
        );
    }

    #[test]
    fn domain_with_target_option_is_managed() {
        let config = LabelConfig::default();
        let d = descriptor(&[
            ("agassi.domain", "a.example.com"),
            ("agassi.opt.target", "http://10.0.0.5:9000"),
        ]);
        assert!(is_managed_service(&config, &d));

        let forward = descriptor(&[
            ("agassi.domain", "a.example.com"),
            ("agassi.options.forward", "http://legacy"),
        ]);
        assert!(is_managed_service(&config, &forward));

        let no_domain = descriptor(&[
            ("agassi.port", "80"),
            ("agassi.opt.target", "http://10.0.0.5:9000"),
        ]);
        assert!(!is_managed_service(&config, &no_domain));
    }

    #[test]
    fn options_use_last_segment() {
        let config = LabelConfig::default();
        let d = descriptor(&[
            ("agassi.opt.xfwd", "true"),
            ("agassi.OPTIONS.proxy.timeout", "30"),
            ("agassi.opts.ws", "true"),
            ("agassi.optimize", "nope"),
            ("agassi.domain", "a.example.com"),
            ("other.opt.ignored", "x"),
        ]);
        let options = ServiceLabels::parse(&config, &d).options();
        assert_eq!(options.len(), 3);
        assert_eq!(options["xfwd"], "true");
        assert_eq!(options["timeout"], "30");
        assert_eq!(options["ws"], "true");
    }

    #[test]
    fn custom_prefix_and_separator() {
        let config = LabelConfig::default()
            .with_prefix("proxy/")
            .with_separator("/");
        let d = descriptor(&[
            ("proxy/protocol", "http"),
            ("proxy/domain", "b.example.com"),
            ("proxy/port", "80"),
            ("proxy/opt/xfwd", "true"),
        ]);
        let record = validate(&config, &d).unwrap();
        assert_eq!(record.domain, "b.example.com");
        assert_eq!(record.options["xfwd"], "true");
    }

    #[test]
    fn record_fields() {
        let config = LabelConfig::default();
        let mut d = full();
        d.spec
            .labels
            .insert("agassi.auth".to_string(), "user:hash".to_string());
        let record = validate(&config, &d).unwrap();

        assert_eq!(record.id, "svc1");
        assert_eq!(record.protocol, Some(Protocol::Https));
        assert_eq!(record.port, Some(8443));
        assert_eq!(record.hostname, "stack_web");
        assert_eq!(record.auth.as_deref(), Some("user:hash"));
        assert!(record.options.is_empty());
    }

    #[test]
    fn bad_values_are_rejected() {
        let config = LabelConfig::default();
        let mut d = full();
        d.spec
            .labels
            .insert("agassi.port".to_string(), "99999".to_string());
        assert_eq!(
            validate(&config, &d),
            Err(LabelValidationError::InvalidPort("99999".to_string()))
        );

        let mut d = full();
        d.spec
            .labels
            .insert("agassi.protocol".to_string(), "gopher".to_string());
        assert_eq!(
            validate(&config, &d),
            Err(LabelValidationError::UnknownProtocol("gopher".to_string()))
        );
    }
}
