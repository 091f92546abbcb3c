//! Emulated devices for tests, demos, and the `maestro-emulator` binary.
//!
//! Two canned profiles mirror the reference hardware fleet: a differential
//! drive base (`FWD`, `BWD`, `TURN`) and a gripper arm (`GRIP`, `HOME`).
//! Both are plain structs; nothing here touches real hardware.

use std::time::Instant;

use maestro_types::{
    ArgSpec, ArgType, ArgValue, CommandSpec, DeviceInfo, Manifest, SafetySpec, TelemetryKey,
    TelemetrySpec, TransportSpec,
};

use crate::device::{Device, DispatchError};
use crate::dispatch::DispatchTable;
use crate::runtime::{NodeRuntime, NodeSetupError};

// ---------------------------------------------------------------------------
// Drive base
// ---------------------------------------------------------------------------

/// Emulated differential drive base. `speed` is signed: positive forward,
/// negative backward.
#[derive(Debug)]
pub struct DriveBase {
    pub speed: f64,
    pub heading_deg: f64,
    pub last_token: String,
    started: Instant,
}

impl DriveBase {
    pub fn new() -> Self {
        Self {
            speed: 0.0,
            heading_deg: 0.0,
            last_token: "NONE".to_string(),
            started: Instant::now(),
        }
    }
}

impl Default for DriveBase {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for DriveBase {
    fn neutral(&mut self) {
        self.speed = 0.0;
    }

    fn telemetry(&self) -> Vec<(String, String)> {
        vec![
            (
                "uptime_ms".to_string(),
                self.started.elapsed().as_millis().to_string(),
            ),
            ("last_token".to_string(), self.last_token.clone()),
        ]
    }
}

fn base_fwd(base: &mut DriveBase, args: &[ArgValue]) -> Result<(), DispatchError> {
    let speed = args
        .first()
        .and_then(ArgValue::as_numeric)
        .ok_or(DispatchError::Internal)?;
    base.speed = speed;
    base.last_token = "FWD".to_string();
    Ok(())
}

fn base_bwd(base: &mut DriveBase, args: &[ArgValue]) -> Result<(), DispatchError> {
    let speed = args
        .first()
        .and_then(ArgValue::as_numeric)
        .ok_or(DispatchError::Internal)?;
    base.speed = -speed;
    base.last_token = "BWD".to_string();
    Ok(())
}

fn base_turn(base: &mut DriveBase, args: &[ArgValue]) -> Result<(), DispatchError> {
    let degrees = args
        .first()
        .and_then(ArgValue::as_numeric)
        .ok_or(DispatchError::Internal)?;
    base.heading_deg = (base.heading_deg + degrees).rem_euclid(360.0);
    base.last_token = "TURN".to_string();
    Ok(())
}

fn speed_arg() -> ArgSpec {
    ArgSpec {
        name: "speed".to_string(),
        arg_type: ArgType::Float,
        min: Some(0.0),
        max: Some(1.0),
        allowed: None,
        required: true,
    }
}

fn drive_safety() -> SafetySpec {
    SafetySpec {
        rate_limit_hz: 20,
        watchdog_ms: 1200,
        clamp: true,
    }
}

/// Manifest exposed by the emulated drive base: `FWD[0..1]`, `BWD[0..1]`,
/// `TURN[-180..180]`.
pub fn drive_base_manifest(name: &str, node_id: &str) -> Manifest {
    Manifest {
        daemon_version: "0.1".to_string(),
        device: DeviceInfo {
            name: name.to_string(),
            version: "0.1.0".to_string(),
            node_id: node_id.to_string(),
        },
        commands: vec![
            CommandSpec {
                token: "FWD".to_string(),
                description: "Move forward".to_string(),
                args: vec![speed_arg()],
                safety: drive_safety(),
            },
            CommandSpec {
                token: "BWD".to_string(),
                description: "Move backward".to_string(),
                args: vec![speed_arg()],
                safety: drive_safety(),
            },
            CommandSpec {
                token: "TURN".to_string(),
                description: "Rotate in place by signed degrees".to_string(),
                args: vec![ArgSpec {
                    name: "degrees".to_string(),
                    arg_type: ArgType::Float,
                    min: Some(-180.0),
                    max: Some(180.0),
                    allowed: None,
                    required: true,
                }],
                safety: drive_safety(),
            },
        ],
        telemetry: TelemetrySpec {
            keys: vec![
                TelemetryKey {
                    name: "uptime_ms".to_string(),
                    key_type: ArgType::Int,
                    unit: Some("ms".to_string()),
                },
                TelemetryKey {
                    name: "last_token".to_string(),
                    key_type: ArgType::String,
                    unit: None,
                },
            ],
        },
        transport: TransportSpec::default(),
    }
}

/// Fully wired drive base runtime.
pub fn drive_base_runtime(name: &str, node_id: &str) -> Result<NodeRuntime<DriveBase>, NodeSetupError> {
    let manifest = drive_base_manifest(name, node_id);
    let table = DispatchTable::new()
        .bind(manifest.commands[0].clone(), base_fwd)
        .bind(manifest.commands[1].clone(), base_bwd)
        .bind(manifest.commands[2].clone(), base_turn);
    NodeRuntime::new(manifest, table, DriveBase::new())
}

// ---------------------------------------------------------------------------
// Gripper arm
// ---------------------------------------------------------------------------

/// Emulated gripper arm. The grip is a discrete open/close state.
pub struct GripperArm {
    pub grip: String,
    pub homed: bool,
    pub last_token: String,
    started: Instant,
}

impl GripperArm {
    pub fn new() -> Self {
        Self {
            grip: "open".to_string(),
            homed: false,
            last_token: "NONE".to_string(),
            started: Instant::now(),
        }
    }
}

impl Default for GripperArm {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for GripperArm {
    fn neutral(&mut self) {
        // A gripper holds position on stop; there is no motion to kill.
        self.last_token = "STOP".to_string();
    }

    fn telemetry(&self) -> Vec<(String, String)> {
        vec![
            (
                "uptime_ms".to_string(),
                self.started.elapsed().as_millis().to_string(),
            ),
            ("grip".to_string(), self.grip.clone()),
        ]
    }
}

fn arm_grip(arm: &mut GripperArm, args: &[ArgValue]) -> Result<(), DispatchError> {
    let state = match args.first() {
        Some(ArgValue::Str(s)) => s.clone(),
        _ => return Err(DispatchError::Internal),
    };
    arm.grip = state;
    arm.last_token = "GRIP".to_string();
    Ok(())
}

fn arm_home(arm: &mut GripperArm, _args: &[ArgValue]) -> Result<(), DispatchError> {
    arm.homed = true;
    arm.last_token = "HOME".to_string();
    Ok(())
}

/// Manifest exposed by the emulated gripper arm: `GRIP{open,close}`, `HOME`.
pub fn gripper_arm_manifest(name: &str, node_id: &str) -> Manifest {
    let safety = SafetySpec {
        rate_limit_hz: 10,
        watchdog_ms: 2000,
        clamp: false,
    };
    Manifest {
        daemon_version: "0.1".to_string(),
        device: DeviceInfo {
            name: name.to_string(),
            version: "0.1.0".to_string(),
            node_id: node_id.to_string(),
        },
        commands: vec![
            CommandSpec {
                token: "GRIP".to_string(),
                description: "Open or close the gripper".to_string(),
                args: vec![ArgSpec {
                    name: "state".to_string(),
                    arg_type: ArgType::String,
                    min: None,
                    max: None,
                    allowed: Some(vec!["open".to_string(), "close".to_string()]),
                    required: true,
                }],
                safety: safety.clone(),
            },
            CommandSpec {
                token: "HOME".to_string(),
                description: "Return the arm to its home pose".to_string(),
                args: vec![],
                safety,
            },
        ],
        telemetry: TelemetrySpec {
            keys: vec![TelemetryKey {
                name: "grip".to_string(),
                key_type: ArgType::String,
                unit: None,
            }],
        },
        transport: TransportSpec::default(),
    }
}

/// Fully wired gripper arm runtime.
pub fn gripper_arm_runtime(name: &str, node_id: &str) -> Result<NodeRuntime<GripperArm>, NodeSetupError> {
    let manifest = gripper_arm_manifest(name, node_id);
    let table = DispatchTable::new()
        .bind(manifest.commands[0].clone(), arm_grip)
        .bind(manifest.commands[1].clone(), arm_home);
    NodeRuntime::new(manifest, table, GripperArm::new())
}
