//! [`DispatchTable`] – build-time token → (spec, handler) lookup.
//!
//! Each entry binds a [`CommandSpec`] from the node's manifest to a plain
//! function over the device instance. Lookup is an O(1) exact string match;
//! argument parsing, arity, range, and enum checks all run against the spec
//! before the handler is invoked, so handlers only ever see typed,
//! in-bounds values.

use std::collections::HashMap;

use maestro_types::{ArgSpec, ArgType, ArgValue, CommandSpec};

use crate::device::{Device, DispatchError};

/// A bound command handler: mutates the device in response to typed args.
pub type Handler<D> = fn(&mut D, &[ArgValue]) -> Result<(), DispatchError>;

#[derive(Debug)]
struct Binding<D> {
    spec: CommandSpec,
    handler: Handler<D>,
}

/// Token-keyed dispatch table for one device type.
#[derive(Debug)]
pub struct DispatchTable<D> {
    entries: HashMap<String, Binding<D>>,
}

impl<D: Device> Default for DispatchTable<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Device> DispatchTable<D> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Bind `handler` under `spec.token` (builder-style). Re-binding a token
    /// replaces the previous entry.
    pub fn bind(mut self, spec: CommandSpec, handler: Handler<D>) -> Self {
        self.entries
            .insert(spec.token.to_uppercase(), Binding { spec, handler });
        self
    }

    /// True when `token` has a binding.
    pub fn contains(&self, token: &str) -> bool {
        self.entries.contains_key(&token.to_uppercase())
    }

    /// Validate raw wire args against the spec and invoke the bound handler.
    ///
    /// Range violations are rejected, not clamped, so every refused command
    /// is visible to the operator.
    pub fn dispatch(
        &self,
        device: &mut D,
        token: &str,
        raw_args: &[String],
    ) -> Result<(), DispatchError> {
        let binding = self
            .entries
            .get(&token.to_uppercase())
            .ok_or(DispatchError::BadToken)?;

        let args = parse_args(&binding.spec.args, raw_args)?;
        (binding.handler)(device, &args)
    }
}

/// Parse positional wire args into typed values, enforcing arity, types,
/// declared `[min,max]` ranges, and enum membership.
fn parse_args(specs: &[ArgSpec], raw_args: &[String]) -> Result<Vec<ArgValue>, DispatchError> {
    let required = specs.iter().filter(|a| a.required).count();
    if raw_args.len() < required || raw_args.len() > specs.len() {
        return Err(DispatchError::BadArgs);
    }

    let mut parsed = Vec::with_capacity(raw_args.len());
    for (spec, raw) in specs.iter().zip(raw_args) {
        let value = parse_one(spec, raw)?;
        if let Some(numeric) = value.as_numeric() {
            if spec.min.is_some_and(|min| numeric < min)
                || spec.max.is_some_and(|max| numeric > max)
            {
                return Err(DispatchError::Range);
            }
        }
        if let Some(allowed) = &spec.allowed {
            if !allowed.iter().any(|a| a == &value.to_string()) {
                return Err(DispatchError::BadArgs);
            }
        }
        parsed.push(value);
    }
    Ok(parsed)
}

fn parse_one(spec: &ArgSpec, raw: &str) -> Result<ArgValue, DispatchError> {
    match spec.arg_type {
        ArgType::Int => raw
            .parse::<i64>()
            .map(ArgValue::Int)
            .map_err(|_| DispatchError::BadArgs),
        ArgType::Float => raw
            .parse::<f64>()
            .map(ArgValue::Float)
            .map_err(|_| DispatchError::BadArgs),
        ArgType::Bool => match raw {
            "true" | "1" => Ok(ArgValue::Bool(true)),
            "false" | "0" => Ok(ArgValue::Bool(false)),
            _ => Err(DispatchError::BadArgs),
        },
        ArgType::String => Ok(ArgValue::Str(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_types::SafetySpec;

    struct Probe {
        speed: f64,
        invocations: usize,
    }

    impl Device for Probe {
        fn neutral(&mut self) {
            self.speed = 0.0;
        }
    }

    fn set_speed(probe: &mut Probe, args: &[ArgValue]) -> Result<(), DispatchError> {
        let speed = args
            .first()
            .and_then(ArgValue::as_numeric)
            .ok_or(DispatchError::Internal)?;
        probe.speed = speed;
        probe.invocations += 1;
        Ok(())
    }

    fn speed_spec() -> CommandSpec {
        CommandSpec {
            token: "FWD".to_string(),
            description: "Move forward".to_string(),
            args: vec![ArgSpec {
                name: "speed".to_string(),
                arg_type: ArgType::Float,
                min: Some(0.0),
                max: Some(1.0),
                allowed: None,
                required: true,
            }],
            safety: SafetySpec::default(),
        }
    }

    fn table() -> DispatchTable<Probe> {
        DispatchTable::new().bind(speed_spec(), set_speed)
    }

    fn probe() -> Probe {
        Probe {
            speed: 0.0,
            invocations: 0,
        }
    }

    #[test]
    fn in_range_arg_dispatches() {
        let mut device = probe();
        table()
            .dispatch(&mut device, "FWD", &["0.6".to_string()])
            .unwrap();
        assert!((device.speed - 0.6).abs() < f64::EPSILON);
        assert_eq!(device.invocations, 1);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let mut device = probe();
        table()
            .dispatch(&mut device, "fwd", &["0.3".to_string()])
            .unwrap();
        assert!((device.speed - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_token_is_bad_token() {
        let mut device = probe();
        let err = table()
            .dispatch(&mut device, "THROTTLE", &["0.6".to_string()])
            .unwrap_err();
        assert_eq!(err, DispatchError::BadToken);
    }

    #[test]
    fn out_of_range_is_rejected_and_device_untouched() {
        let mut device = probe();
        let err = table()
            .dispatch(&mut device, "FWD", &["1.5".to_string()])
            .unwrap_err();
        assert_eq!(err, DispatchError::Range);
        assert_eq!(device.invocations, 0);
        assert!((device.speed - 0.0).abs() < f64::EPSILON);

        let err = table()
            .dispatch(&mut device, "FWD", &["-0.1".to_string()])
            .unwrap_err();
        assert_eq!(err, DispatchError::Range);
        assert_eq!(device.invocations, 0);
    }

    #[test]
    fn arity_mismatch_is_bad_args() {
        let mut device = probe();
        assert_eq!(
            table().dispatch(&mut device, "FWD", &[]).unwrap_err(),
            DispatchError::BadArgs
        );
        assert_eq!(
            table()
                .dispatch(&mut device, "FWD", &["0.5".to_string(), "0.5".to_string()])
                .unwrap_err(),
            DispatchError::BadArgs
        );
    }

    #[test]
    fn optional_args_may_be_omitted() {
        let mut spec = speed_spec();
        spec.args.push(ArgSpec {
            name: "ramp_ms".to_string(),
            arg_type: ArgType::Int,
            min: Some(0.0),
            max: None,
            allowed: None,
            required: false,
        });
        let table = DispatchTable::new().bind(spec, set_speed);
        let mut device = probe();
        table.dispatch(&mut device, "FWD", &["0.4".to_string()]).unwrap();
        table
            .dispatch(&mut device, "FWD", &["0.4".to_string(), "250".to_string()])
            .unwrap();
        assert_eq!(device.invocations, 2);
    }

    #[test]
    fn unparseable_arg_is_bad_args() {
        let mut device = probe();
        assert_eq!(
            table()
                .dispatch(&mut device, "FWD", &["fast".to_string()])
                .unwrap_err(),
            DispatchError::BadArgs
        );
    }

    #[test]
    fn enum_arg_must_match_declared_values() {
        let spec = CommandSpec {
            token: "GRIP".to_string(),
            description: String::new(),
            args: vec![ArgSpec {
                name: "state".to_string(),
                arg_type: ArgType::String,
                min: None,
                max: None,
                allowed: Some(vec!["open".to_string(), "close".to_string()]),
                required: true,
            }],
            safety: SafetySpec::default(),
        };
        fn noop(_: &mut Probe, _: &[ArgValue]) -> Result<(), DispatchError> {
            Ok(())
        }
        let table = DispatchTable::new().bind(spec, noop);
        let mut device = probe();
        assert!(table.dispatch(&mut device, "GRIP", &["close".to_string()]).is_ok());
        assert_eq!(
            table
                .dispatch(&mut device, "GRIP", &["crush".to_string()])
                .unwrap_err(),
            DispatchError::BadArgs
        );
    }

    #[test]
    fn bool_args_accept_wire_forms() {
        let spec = CommandSpec {
            token: "LIGHT".to_string(),
            description: String::new(),
            args: vec![ArgSpec {
                name: "on".to_string(),
                arg_type: ArgType::Bool,
                min: None,
                max: None,
                allowed: None,
                required: true,
            }],
            safety: SafetySpec::default(),
        };
        fn noop(_: &mut Probe, _: &[ArgValue]) -> Result<(), DispatchError> {
            Ok(())
        }
        let table = DispatchTable::new().bind(spec, noop);
        let mut device = probe();
        for raw in ["true", "false", "1", "0"] {
            assert!(table.dispatch(&mut device, "LIGHT", &[raw.to_string()]).is_ok());
        }
        assert_eq!(
            table
                .dispatch(&mut device, "LIGHT", &["yes".to_string()])
                .unwrap_err(),
            DispatchError::BadArgs
        );
    }
}
