use std::collections::HashMap;

use anyhow::{Context, Result};
use tracing::debug;

use crate::{changed_keys, OptionMap, OptionValue, PassSpec};

/// In-place mutation surface of a live pass instance.
pub trait StackPass {
    /// Patches one tunable option. Values outside the declared range are
    /// clamped by the pass; unknown names are ignored.
    fn set_option(&mut self, name: &str, value: &OptionValue);
}

impl<T: StackPass + ?Sized> StackPass for Box<T> {
    fn set_option(&mut self, name: &str, value: &OptionValue) {
        (**self).set_option(name, value);
    }
}

/// Constructs pass instances and declares, per type, which option keys are
/// structural (a change forces destroy-and-rebuild rather than a patch).
pub trait PassFactory {
    type Pass: StackPass;

    fn build(&mut self, kind: &str, options: &OptionMap) -> Result<Self::Pass>;

    /// Structural keys for `kind`, or `None` if the type is unknown.
    fn structural_keys(&self, kind: &str) -> Option<&'static [&'static str]>;
}

struct CacheEntry<P> {
    kind: String,
    pass: P,
    snapshot: OptionMap,
}

/// Diffs desired stack documents against the cache of live pass instances.
///
/// The central performance invariant: tunable-only edits never cause GPU
/// resource churn, structural edits always produce a fresh instance.
pub struct Reconciler<F: PassFactory> {
    factory: F,
    cache: HashMap<String, CacheEntry<F::Pass>>,
}

impl<F: PassFactory> Reconciler<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            cache: HashMap::new(),
        }
    }

    /// Brings the cache in line with `specs` and returns the ordered list of
    /// enabled pass instances, in spec order.
    pub fn reconcile(&mut self, specs: &[PassSpec]) -> Result<Vec<&mut F::Pass>> {
        let present: std::collections::HashSet<&str> =
            specs.iter().map(|s| s.id.as_str()).collect();
        self.cache.retain(|id, _| {
            let keep = present.contains(id.as_str());
            if !keep {
                debug!(id, "dropping pass removed from stack");
            }
            keep
        });

        for spec in specs {
            self.sync_entry(spec)?;
        }

        let mut by_id: HashMap<&str, &mut F::Pass> = self
            .cache
            .iter_mut()
            .map(|(id, entry)| (id.as_str(), &mut entry.pass))
            .collect();
        let mut ordered = Vec::new();
        for spec in specs {
            if !spec.enabled {
                continue;
            }
            if let Some(pass) = by_id.remove(spec.id.as_str()) {
                ordered.push(pass);
            }
        }
        Ok(ordered)
    }

    fn sync_entry(&mut self, spec: &PassSpec) -> Result<()> {
        let structural = self
            .factory
            .structural_keys(&spec.kind)
            .with_context(|| format!("unknown pass type '{}'", spec.kind))?;

        let rebuild = match self.cache.get(&spec.id) {
            None => true,
            Some(entry) if entry.kind != spec.kind => {
                debug!(id = %spec.id, from = %entry.kind, to = %spec.kind, "pass type changed; rebuilding");
                true
            }
            Some(entry) => {
                let changed = changed_keys(&entry.snapshot, &spec.options);
                let hit = changed.iter().find(|k| structural.contains(&k.as_str()));
                if let Some(key) = hit {
                    debug!(id = %spec.id, key = %key, "structural option changed; rebuilding");
                    true
                } else {
                    false
                }
            }
        };

        if rebuild {
            let pass = self
                .factory
                .build(&spec.kind, &spec.options)
                .with_context(|| format!("failed to build pass '{}' ({})", spec.id, spec.kind))?;
            self.cache.insert(
                spec.id.clone(),
                CacheEntry {
                    kind: spec.kind.clone(),
                    pass,
                    snapshot: spec.options.clone(),
                },
            );
            return Ok(());
        }

        let entry = self.cache.get_mut(&spec.id).expect("entry checked above");
        for key in changed_keys(&entry.snapshot, &spec.options) {
            if let Some(value) = spec.options.get(&key) {
                debug!(id = %spec.id, key = %key, "patching tunable option");
                entry.pass.set_option(&key, value);
            }
        }
        entry.snapshot = spec.options.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fake pass that records its construction serial and patched options.
    struct FakePass {
        serial: u64,
        patched: Vec<(String, OptionValue)>,
    }

    impl StackPass for FakePass {
        fn set_option(&mut self, name: &str, value: &OptionValue) {
            self.patched.push((name.to_string(), value.clone()));
        }
    }

    struct FakeFactory {
        next_serial: u64,
    }

    impl PassFactory for FakeFactory {
        type Pass = FakePass;

        fn build(&mut self, kind: &str, _options: &OptionMap) -> Result<FakePass> {
            if kind == "broken" {
                anyhow::bail!("shader failed to compile");
            }
            self.next_serial += 1;
            Ok(FakePass {
                serial: self.next_serial,
                patched: Vec::new(),
            })
        }

        fn structural_keys(&self, kind: &str) -> Option<&'static [&'static str]> {
            match kind {
                "sortish" => Some(&["mode", "direction"]),
                "plain" | "broken" => Some(&[]),
                _ => None,
            }
        }
    }

    fn spec(id: &str, kind: &str, options: &[(&str, OptionValue)]) -> PassSpec {
        PassSpec {
            id: id.to_string(),
            kind: kind.to_string(),
            enabled: true,
            options: options
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    fn reconciler() -> Reconciler<FakeFactory> {
        Reconciler::new(FakeFactory { next_serial: 0 })
    }

    #[test]
    fn tunable_edit_preserves_instance_identity() {
        let mut r = reconciler();
        let specs = vec![spec(
            "a",
            "sortish",
            &[("low", OptionValue::Number(0.2))],
        )];
        let first = r.reconcile(&specs).unwrap()[0].serial;

        let specs = vec![spec(
            "a",
            "sortish",
            &[("low", OptionValue::Number(0.7))],
        )];
        let passes = r.reconcile(&specs).unwrap();
        assert_eq!(passes[0].serial, first);
        assert_eq!(
            passes[0].patched,
            vec![("low".to_string(), OptionValue::Number(0.7))]
        );
    }

    #[test]
    fn structural_edit_rebuilds_instance() {
        let mut r = reconciler();
        let specs = vec![spec("a", "sortish", &[("mode", OptionValue::Text("Full".into()))])];
        let first = r.reconcile(&specs).unwrap()[0].serial;

        let specs = vec![spec(
            "a",
            "sortish",
            &[("mode", OptionValue::Text("Threshold".into()))],
        )];
        let passes = r.reconcile(&specs).unwrap();
        assert_ne!(passes[0].serial, first);
        assert!(passes[0].patched.is_empty());
    }

    #[test]
    fn type_change_rebuilds_instance() {
        let mut r = reconciler();
        let first = r.reconcile(&[spec("a", "plain", &[])]).unwrap()[0].serial;
        let passes = r.reconcile(&[spec("a", "sortish", &[])]).unwrap();
        assert_ne!(passes[0].serial, first);
    }

    #[test]
    fn removed_entries_are_dropped_and_rebuilt_on_return() {
        let mut r = reconciler();
        let first = r.reconcile(&[spec("a", "plain", &[])]).unwrap()[0].serial;
        assert!(r.reconcile(&[]).unwrap().is_empty());
        let again = r.reconcile(&[spec("a", "plain", &[])]).unwrap()[0].serial;
        assert_ne!(again, first);
    }

    #[test]
    fn disabled_entries_keep_cache_but_leave_render_list() {
        let mut r = reconciler();
        let first = r.reconcile(&[spec("a", "plain", &[])]).unwrap()[0].serial;

        let mut disabled = spec("a", "plain", &[]);
        disabled.enabled = false;
        assert!(r.reconcile(&[disabled]).unwrap().is_empty());

        // Re-enabling reuses the cached instance.
        let passes = r.reconcile(&[spec("a", "plain", &[])]).unwrap();
        assert_eq!(passes[0].serial, first);
    }

    #[test]
    fn render_list_follows_spec_order() {
        let mut r = reconciler();
        let specs = vec![spec("b", "plain", &[]), spec("a", "plain", &[])];
        let serials: Vec<u64> = r
            .reconcile(&specs)
            .unwrap()
            .iter()
            .map(|p| p.serial)
            .collect();
        let reordered = vec![spec("a", "plain", &[]), spec("b", "plain", &[])];
        let swapped: Vec<u64> = r
            .reconcile(&reordered)
            .unwrap()
            .iter()
            .map(|p| p.serial)
            .collect();
        assert_eq!(serials.len(), 2);
        assert_eq!(swapped, vec![serials[1], serials[0]]);
    }

    #[test]
    fn unknown_type_is_an_error() {
        let mut r = reconciler();
        assert!(r.reconcile(&[spec("a", "nope", &[])]).is_err());
    }

    struct BoxedFactory(FakeFactory);

    impl PassFactory for BoxedFactory {
        type Pass = Box<dyn StackPass>;

        fn build(&mut self, kind: &str, options: &OptionMap) -> Result<Box<dyn StackPass>> {
            Ok(Box::new(self.0.build(kind, options)?))
        }

        fn structural_keys(&self, kind: &str) -> Option<&'static [&'static str]> {
            self.0.structural_keys(kind)
        }
    }

    #[test]
    fn boxed_passes_reborrow_into_trait_object_refs() {
        let mut r = Reconciler::new(BoxedFactory(FakeFactory { next_serial: 0 }));
        let specs = vec![spec("a", "plain", &[]), spec("b", "plain", &[])];
        let passes = r.reconcile(&specs).unwrap();
        let mut refs: Vec<&mut dyn StackPass> = passes
            .into_iter()
            .map(|p| &mut **p as &mut dyn StackPass)
            .collect();
        assert_eq!(refs.len(), 2);
        for pass in &mut refs {
            pass.set_option("low", &OptionValue::Number(0.3));
        }
    }

    #[test]
    fn nan_option_does_not_rebuild_every_frame() {
        let mut r = reconciler();
        let specs = vec![spec("a", "sortish", &[("low", OptionValue::Number(f64::NAN))])];
        let first = r.reconcile(&specs).unwrap()[0].serial;
        let passes = r.reconcile(&specs).unwrap();
        assert_eq!(passes[0].serial, first);
        assert!(passes[0].patched.is_empty());
    }
}
