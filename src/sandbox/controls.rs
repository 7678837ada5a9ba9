use bevy::input::mouse::{MouseMotion, MouseScrollUnit, MouseWheel};
use bevy::prelude::*;

const MIN_POLAR: f32 = 0.000_1;
const MAX_POLAR: f32 = std::f32::consts::PI - 0.000_1;
const EPS: f32 = 0.000_001;

/// Marks the single viewport camera.
#[derive(Component)]
pub struct StageCamera;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrbitPose {
    pub position: Vec3,
    pub target: Vec3,
}

#[derive(Clone, Copy, Debug, Default)]
struct OrbitDelta {
    yaw: f32,
    pitch: f32,
    dolly: f32,
    pan: Vec3,
}

impl OrbitDelta {
    fn is_idle(&self) -> bool {
        self.yaw.abs() < EPS
            && self.pitch.abs() < EPS
            && self.dolly.abs() < EPS
            && self.pan.length_squared() < EPS * EPS
    }
}

/// Orbit-style view controls around a target point, with optional damping.
///
/// Input accumulates into a pending delta; `step` consumes a damped share of
/// it every frame and rewrites the camera transform.
#[derive(Component, Clone, Debug)]
pub struct OrbitControls {
    pub target: Vec3,
    pub enable_damping: bool,
    pub damping_factor: f32,
    pub rotate_speed: f32,
    pub zoom_speed: f32,
    pub pan_speed: f32,
    pub min_distance: f32,
    pub max_distance: f32,
    saved: OrbitPose,
    pending: OrbitDelta,
}

impl OrbitControls {
    pub fn new(position: Vec3, target: Vec3) -> Self {
        Self {
            target,
            enable_damping: false,
            damping_factor: 0.05,
            rotate_speed: 1.0,
            zoom_speed: 1.0,
            pan_speed: 1.0,
            min_distance: 0.0,
            max_distance: f32::INFINITY,
            saved: OrbitPose { position, target },
            pending: OrbitDelta::default(),
        }
    }

    pub fn with_damping(mut self, factor: f32) -> Self {
        self.enable_damping = true;
        self.damping_factor = factor;
        self
    }

    pub fn saved(&self) -> OrbitPose {
        self.saved
    }

    pub fn save_state(&mut self, transform: &Transform) {
        self.saved = OrbitPose {
            position: transform.translation,
            target: self.target,
        };
    }

    /// Restores the saved pose and drops any motion still in flight.
    pub fn reset(&mut self, transform: &mut Transform) {
        self.target = self.saved.target;
        self.pending = OrbitDelta::default();
        transform.translation = self.saved.position;
        look_at_safely(transform, self.target);
    }

    pub fn rotate(&mut self, yaw: f32, pitch: f32) {
        self.pending.yaw += yaw * self.rotate_speed;
        self.pending.pitch += pitch * self.rotate_speed;
    }

    /// Positive amounts move the camera away from the target.
    pub fn dolly(&mut self, amount: f32) {
        self.pending.dolly += amount * self.zoom_speed;
    }

    pub fn pan(&mut self, offset: Vec3) {
        self.pending.pan += offset * self.pan_speed;
    }

    /// Applies one frame of motion. Returns whether the camera moved.
    pub fn step(&mut self, transform: &mut Transform) -> bool {
        if self.pending.is_idle() {
            self.pending = OrbitDelta::default();
            return false;
        }
        let share = if self.enable_damping {
            self.damping_factor.clamp(0.0, 1.0)
        } else {
            1.0
        };

        let offset = transform.translation - self.target;
        let mut radius = offset.length().max(EPS);
        let mut theta = offset.x.atan2(offset.z);
        let mut phi = (offset.y / radius).clamp(-1.0, 1.0).acos();

        theta -= self.pending.yaw * share;
        phi = (phi - self.pending.pitch * share).clamp(MIN_POLAR, MAX_POLAR);
        radius = (radius * (self.pending.dolly * share).exp())
            .clamp(self.min_distance.max(EPS), self.max_distance);
        self.target += self.pending.pan * share;

        let sin_phi = phi.sin();
        let offset = Vec3::new(
            radius * sin_phi * theta.sin(),
            radius * phi.cos(),
            radius * sin_phi * theta.cos(),
        );
        transform.translation = self.target + offset;
        look_at_safely(transform, self.target);

        if self.enable_damping {
            let keep = 1.0 - share;
            self.pending.yaw *= keep;
            self.pending.pitch *= keep;
            self.pending.dolly *= keep;
            self.pending.pan *= keep;
        } else {
            self.pending = OrbitDelta::default();
        }
        true
    }
}

fn look_at_safely(transform: &mut Transform, target: Vec3) {
    if transform.translation.distance_squared(target) > EPS {
        transform.look_at(target, Vec3::Y);
    }
}

pub(crate) fn update_orbit_controls(
    mut cameras: Query<(&mut Transform, &mut OrbitControls), With<StageCamera>>,
) {
    for (mut transform, mut controls) in &mut cameras {
        controls.step(&mut transform);
    }
}

/// Left drag rotates, right drag pans, wheel dollies.
pub(crate) fn orbit_input(
    buttons: Res<ButtonInput<MouseButton>>,
    mut motion: EventReader<MouseMotion>,
    mut wheel: EventReader<MouseWheel>,
    mut cameras: Query<(&Transform, &mut OrbitControls), With<StageCamera>>,
) {
    let drag: Vec2 = motion.read().map(|event| event.delta).sum();
    let scroll: f32 = wheel
        .read()
        .map(|event| match event.unit {
            MouseScrollUnit::Line => event.y,
            MouseScrollUnit::Pixel => event.y / 40.0,
        })
        .sum();

    let Ok((transform, mut controls)) = cameras.get_single_mut() else {
        return;
    };
    if buttons.pressed(MouseButton::Left) && drag != Vec2::ZERO {
        controls.rotate(drag.x * 0.005, drag.y * 0.005);
    }
    if buttons.pressed(MouseButton::Right) && drag != Vec2::ZERO {
        let distance = transform.translation.distance(controls.target);
        let offset =
            (transform.left() * drag.x + transform.up() * drag.y) * distance * 0.001;
        controls.pan(offset);
    }
    if scroll.abs() > EPS {
        controls.dolly(-scroll * 0.1);
    }
}

/// Returns the viewport camera to its saved pose.
pub(crate) fn reset_stage_camera(world: &mut World) {
    let mut cameras =
        world.query_filtered::<(&mut Transform, &mut OrbitControls), With<StageCamera>>();
    for (mut transform, mut controls) in cameras.iter_mut(world) {
        controls.reset(&mut transform);
    }
}
