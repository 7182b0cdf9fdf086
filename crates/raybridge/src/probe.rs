//! # Probe
//!
//! A synthetic producer standing in for the legacy renderer during
//! bring-up. Frame 1 uploads a cube and its material; every frame then
//! draws a row of spinning cubes and waits for presentation.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use raybridge_core::{next_id, ChannelSender, ChannelStats, ChannelResult, Role};
use raybridge_shared::{
    BufferUsage, CreateBuffer, CreateMaterial, DrawInstance, GeometryDesc, IndexFormat,
    MaterialFlags, Transform,
};
use tracing::{debug, info};

use crate::config::BridgeConfig;
use crate::connect;
use crate::error::AppResult;

/// Rotation per frame, radians.
const SPIN_PER_FRAME: f32 = 0.05;

/// Distance between cubes along X.
const SPACING: f32 = 3.0;

const CUBE_VERTEX_COUNT: u32 = 8;
const CUBE_INDEX_COUNT: u32 = 36;

const CUBE_POSITIONS: [[f32; 3]; CUBE_VERTEX_COUNT as usize] = [
    [-1.0, -1.0, -1.0],
    [1.0, -1.0, -1.0],
    [1.0, 1.0, -1.0],
    [-1.0, 1.0, -1.0],
    [-1.0, -1.0, 1.0],
    [1.0, -1.0, 1.0],
    [1.0, 1.0, 1.0],
    [-1.0, 1.0, 1.0],
];

#[rustfmt::skip]
const CUBE_INDICES: [u16; CUBE_INDEX_COUNT as usize] = [
    0, 2, 1, 0, 3, 2, // -z
    4, 5, 6, 4, 6, 7, // +z
    0, 1, 5, 0, 5, 4, // -y
    3, 7, 6, 3, 6, 2, // +y
    0, 4, 7, 0, 7, 3, // -x
    1, 2, 6, 1, 6, 5, // +x
];

/// Command-line options of `raybridge_probe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOptions {
    /// Frames to submit
    pub frames: u64,
    /// Cubes drawn per frame
    pub instances: u32,
    /// Unlink leftover named objects before creating them
    pub force: bool,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            frames: 60,
            instances: 4,
            force: false,
        }
    }
}

/// What a probe run measured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeSummary {
    /// Frames presented by the host
    pub frames: u64,
    /// Mean submit-to-present time
    pub mean_round_trip: Duration,
    /// Worst submit-to-present time
    pub max_round_trip: Duration,
    /// Channel counters
    pub channel: ChannelStats,
}

/// Identifiers of the uploaded cube.
#[derive(Debug, Clone, Copy)]
struct Cube {
    mesh: u64,
}

/// Submits `options.frames` frames and waits for each to be presented.
///
/// # Errors
///
/// Setup failures, or a channel failure other than shutdown.
pub fn run(
    config: &BridgeConfig,
    options: &ProbeOptions,
    shutdown: &Arc<AtomicBool>,
) -> AppResult<ProbeSummary> {
    let link = connect::establish(config, Role::Producer, options.force, shutdown)?;
    let mut sender = ChannelSender::new(link).with_shutdown(Arc::clone(shutdown));

    let cube = upload_cube(&mut sender)?;
    info!(mesh = cube.mesh, instances = options.instances, "probe scene staged");

    let mut summary = ProbeSummary::default();
    let mut total = Duration::ZERO;
    for frame in 1..=options.frames {
        let started = Instant::now();
        let submitted = submit_frame(&mut sender, cube, frame, options.instances)
            .and_then(|()| sender.wait_presented());
        match submitted {
            Ok(()) => {}
            Err(e) if !e.is_fatal() => {
                info!(frame, "shutdown requested");
                break;
            }
            Err(e) => return Err(e.into()),
        }

        let round_trip = started.elapsed();
        total += round_trip;
        summary.max_round_trip = summary.max_round_trip.max(round_trip);
        summary.frames = frame;
        debug!(frame, round_trip_us = micros(round_trip), "frame presented");
    }

    if summary.frames > 0 {
        summary.mean_round_trip = total / u32::try_from(summary.frames).unwrap_or(u32::MAX);
    }
    summary.channel = *sender.stats();
    info!(
        frames = summary.frames,
        mean_us = micros(summary.mean_round_trip),
        max_us = micros(summary.max_round_trip),
        "probe finished"
    );
    Ok(summary)
}

fn upload_cube(sender: &mut ChannelSender) -> ChannelResult<Cube> {
    let index_buffer = next_id();
    let vertex_buffer = next_id();
    let material = next_id();
    let mesh = next_id();

    let indices: &[u8] = bytemuck::cast_slice(&CUBE_INDICES);
    let vertices: &[u8] = bytemuck::cast_slice(&CUBE_POSITIONS);

    sender.send(&CreateBuffer {
        id: index_buffer,
        byte_size: indices.len() as u64,
        usage: BufferUsage::INDEX.bits(),
        index_format: IndexFormat::U16 as u32,
    })?;
    sender.send_write(index_buffer, 0, indices)?;

    sender.send(&CreateBuffer {
        id: vertex_buffer,
        byte_size: vertices.len() as u64,
        usage: BufferUsage::VERTEX.bits(),
        index_format: IndexFormat::None as u32,
    })?;
    sender.send_write(vertex_buffer, 0, vertices)?;

    let mut surface = CreateMaterial {
        id: material,
        flags: MaterialFlags::DOUBLE_SIDED.bits(),
        ..CreateMaterial::default()
    };
    // Base colour
    surface.parameters[0] = [0.8, 0.3, 0.1, 1.0];
    sender.send(&surface)?;

    let geometry = GeometryDesc {
        index_buffer,
        vertex_buffer,
        material,
        index_count: CUBE_INDEX_COUNT,
        vertex_count: CUBE_VERTEX_COUNT,
        vertex_stride: 12,
        position_offset: 0,
        ..GeometryDesc::default()
    };
    sender.send_mesh(mesh, 0, &[geometry])?;

    Ok(Cube { mesh })
}

#[allow(clippy::cast_precision_loss)] // frame counts stay far below 2^24
fn submit_frame(
    sender: &mut ChannelSender,
    cube: Cube,
    frame: u64,
    instances: u32,
) -> ChannelResult<()> {
    let angle = frame as f32 * SPIN_PER_FRAME;
    for i in 0..instances {
        sender.send(&DrawInstance {
            transform: spin(angle, i as f32 * SPACING),
            mesh: cube.mesh,
            element: 0,
            reserved: 0,
        })?;
    }
    sender.end_frame(frame, frame == 1)
}

fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

/// Rotation about Y by `angle`, then a translation along X.
fn spin(angle: f32, x: f32) -> Transform {
    let (sin, cos) = angle.sin_cos();
    [
        [cos, 0.0, sin, x],
        [0.0, 1.0, 0.0, 0.0],
        [-sin, 0.0, cos, 0.0],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use raybridge_shared::IDENTITY_TRANSFORM;

    #[test]
    fn test_spin_at_zero_is_translation() {
        let mut expected = IDENTITY_TRANSFORM;
        expected[0][3] = 6.0;
        assert_eq!(spin(0.0, 6.0), expected);
    }

    #[test]
    fn test_cube_geometry_is_valid() {
        let geometry = GeometryDesc {
            index_buffer: 1,
            vertex_buffer: 2,
            index_count: CUBE_INDEX_COUNT,
            vertex_count: CUBE_VERTEX_COUNT,
            vertex_stride: 12,
            ..GeometryDesc::default()
        };
        assert!(geometry.validate().is_ok());
        assert_eq!(geometry.triangle_count(), 12);
        assert!(CUBE_INDICES.iter().all(|&i| usize::from(i) < CUBE_POSITIONS.len()));
    }
}
