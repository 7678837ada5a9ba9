use bevy::pbr::{NotShadowCaster, NotShadowReceiver};
use bevy::prelude::*;
use std::collections::HashMap;

use crate::sandbox::controls::{OrbitControls, StageCamera};
use crate::sandbox::scene::{
    Baseline, MaterialSlots, SceneNode, UserNode, ILLUMINANCE_PER_UNIT, LUMENS_PER_UNIT,
};

pub(crate) const MAX_NODE_DEPTH: usize = 256;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum GeometrySpec {
    Cuboid(Vec3),
    Sphere { radius: f32 },
    Cylinder { radius: f32, height: f32 },
    Cone { radius: f32, height: f32 },
    Torus { major: f32, minor: f32 },
    Plane { width: f32, depth: f32 },
    Capsule { radius: f32, length: f32 },
}

impl GeometrySpec {
    fn build(&self) -> Mesh {
        match *self {
            GeometrySpec::Cuboid(size) => Cuboid::new(size.x, size.y, size.z).into(),
            GeometrySpec::Sphere { radius } => Sphere::new(radius).into(),
            GeometrySpec::Cylinder { radius, height } => Cylinder::new(radius, height).into(),
            GeometrySpec::Cone { radius, height } => Cone { radius, height }.into(),
            GeometrySpec::Torus { major, minor } => Torus {
                minor_radius: minor,
                major_radius: major,
            }
            .into(),
            GeometrySpec::Plane { width, depth } => {
                Plane3d::new(Vec3::Y, Vec2::new(width / 2.0, depth / 2.0)).into()
            }
            GeometrySpec::Capsule { radius, length } => Capsule3d::new(radius, length).into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct MaterialSpec {
    pub color: Color,
    pub roughness: f32,
    pub metalness: f32,
    pub emissive: Color,
    pub opacity: f32,
    pub unlit: bool,
}

impl Default for MaterialSpec {
    fn default() -> Self {
        Self {
            color: Color::WHITE,
            roughness: 1.0,
            metalness: 0.0,
            emissive: Color::BLACK,
            opacity: 1.0,
            unlit: false,
        }
    }
}

impl MaterialSpec {
    fn build(&self) -> StandardMaterial {
        let opacity = self.opacity.clamp(0.0, 1.0);
        StandardMaterial {
            base_color: self.color.with_alpha(opacity),
            perceptual_roughness: self.roughness.clamp(0.0, 1.0),
            metallic: self.metalness.clamp(0.0, 1.0),
            emissive: self.emissive.to_linear(),
            unlit: self.unlit,
            alpha_mode: if opacity < 1.0 {
                AlphaMode::Blend
            } else {
                AlphaMode::Opaque
            },
            ..default()
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum NodeKind {
    Group,
    Mesh {
        geometry: usize,
        materials: Vec<usize>,
    },
    PointLight {
        color: Color,
        intensity: f32,
    },
    SpotLight {
        color: Color,
        intensity: f32,
    },
    DirectionalLight {
        color: Color,
        intensity: f32,
    },
}

#[derive(Clone, Debug)]
pub(crate) struct NodeSpec {
    pub kind: NodeKind,
    pub name: Option<String>,
    pub transform: Transform,
    /// Set once the script orients the node itself.
    pub aimed: bool,
    pub cast_shadow: bool,
    pub receive_shadow: bool,
    pub visible: bool,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

impl NodeSpec {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            name: None,
            transform: Transform::default(),
            aimed: false,
            cast_shadow: true,
            receive_shadow: true,
            visible: true,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn look_at(&mut self, target: Vec3) {
        if self.transform.translation.distance_squared(target) > f32::EPSILON {
            self.transform.look_at(target, Vec3::Y);
        }
        self.aimed = true;
    }
}

/// Camera, controls and renderer edits, applied in call order.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum StageOp {
    CameraPosition(Vec3),
    CameraLookAt(Vec3),
    CameraFov(f32),
    ControlsTarget(Vec3),
    ControlsDamping { enabled: bool, factor: f32 },
    ControlsSaveState,
    ControlsReset,
    ClearColor(Color),
    Shadows(bool),
}

/// Everything a script builds during one invocation. Nothing touches the
/// world until [`Staging::commit`].
#[derive(Default)]
pub(crate) struct Staging {
    pub geometries: Vec<GeometrySpec>,
    pub materials: Vec<MaterialSpec>,
    pub nodes: Vec<NodeSpec>,
    pub roots: Vec<usize>,
    pub ops: Vec<StageOp>,
    pub viewport: UVec2,
}

impl Staging {
    pub fn new(viewport: UVec2) -> Self {
        Self {
            viewport,
            ..default()
        }
    }

    pub fn add_geometry(&mut self, spec: GeometrySpec) -> usize {
        self.geometries.push(spec);
        self.geometries.len() - 1
    }

    pub fn add_material(&mut self, spec: MaterialSpec) -> usize {
        self.materials.push(spec);
        self.materials.len() - 1
    }

    pub fn add_node(&mut self, kind: NodeKind) -> usize {
        self.nodes.push(NodeSpec::new(kind));
        self.nodes.len() - 1
    }

    pub fn node_mut(&mut self, id: usize) -> &mut NodeSpec {
        &mut self.nodes[id]
    }

    fn detach(&mut self, id: usize) {
        if let Some(parent) = self.nodes[id].parent.take() {
            self.nodes[parent].children.retain(|child| *child != id);
        }
        self.roots.retain(|root| *root != id);
    }

    /// Adding a node that already has a parent moves it.
    pub fn add_to_scene(&mut self, id: usize) {
        self.detach(id);
        self.roots.push(id);
    }

    /// Rejects cycles and hierarchies deeper than [`MAX_NODE_DEPTH`].
    pub fn add_child(&mut self, parent: usize, child: usize) -> Result<(), String> {
        if parent == child {
            return Err("a node cannot be added to itself".to_string());
        }
        let mut depth = 1;
        let mut cursor = self.nodes[parent].parent;
        while let Some(ancestor) = cursor {
            if ancestor == child {
                return Err("a node cannot be added to one of its descendants".to_string());
            }
            depth += 1;
            cursor = self.nodes[ancestor].parent;
        }
        if depth + self.subtree_height(child) > MAX_NODE_DEPTH {
            return Err(format!(
                "node hierarchy cannot be deeper than {MAX_NODE_DEPTH} levels"
            ));
        }
        self.detach(child);
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.push(child);
        Ok(())
    }

    /// Levels in the subtree rooted at `id`, counting `id` itself.
    fn subtree_height(&self, id: usize) -> usize {
        let mut height = 0;
        let mut stack = vec![(id, 1)];
        while let Some((node, level)) = stack.pop() {
            height = height.max(level);
            stack.extend(self.nodes[node].children.iter().map(|&c| (c, level + 1)));
        }
        height
    }

    /// Spawns every node reachable from the scene under the stage root and
    /// applies staged edits. Returns the number of nodes spawned.
    pub fn commit(self, world: &mut World, baseline: &Baseline) -> usize {
        let mut assets = AssetCache::default();
        let mut spawned = 0;
        let mut stack: Vec<(usize, Entity)> =
            self.roots.iter().rev().map(|&root| (root, baseline.stage)).collect();
        while let Some((id, parent)) = stack.pop() {
            let entity = self.spawn_node(world, id, parent, &mut assets);
            stack.extend(self.nodes[id].children.iter().rev().map(|&c| (c, entity)));
            spawned += 1;
        }
        for op in &self.ops {
            apply_op(world, baseline, op);
        }
        spawned
    }

    fn spawn_node(
        &self,
        world: &mut World,
        id: usize,
        parent: Entity,
        assets: &mut AssetCache,
    ) -> Entity {
        let spec = &self.nodes[id];
        let visibility = if spec.visible {
            Visibility::Inherited
        } else {
            Visibility::Hidden
        };
        let mut transform = spec.transform;
        if !spec.aimed
            && matches!(
                spec.kind,
                NodeKind::SpotLight { .. } | NodeKind::DirectionalLight { .. }
            )
            && transform.translation.length_squared() > f32::EPSILON
        {
            // Unaimed lights point at the origin.
            transform.look_at(Vec3::ZERO, Vec3::Y);
        }

        let entity = world
            .spawn((SceneNode, UserNode, transform, visibility))
            .id();
        if let Some(name) = &spec.name {
            world.entity_mut(entity).insert(Name::new(name.clone()));
        }

        match &spec.kind {
            NodeKind::Group => {}
            NodeKind::Mesh {
                geometry,
                materials,
            } => {
                let mesh = assets.mesh(world, &self.geometries, *geometry);
                let slots: Vec<Handle<StandardMaterial>> = if materials.is_empty() {
                    vec![assets.fallback_material(world)]
                } else {
                    materials
                        .iter()
                        .map(|m| assets.material(world, &self.materials, *m))
                        .collect()
                };
                let mut node = world.entity_mut(entity);
                node.insert((
                    Mesh3d(mesh),
                    MeshMaterial3d(slots[0].clone()),
                    MaterialSlots(slots),
                ));
                if !spec.cast_shadow {
                    node.insert(NotShadowCaster);
                }
                if !spec.receive_shadow {
                    node.insert(NotShadowReceiver);
                }
            }
            NodeKind::PointLight { color, intensity } => {
                world.entity_mut(entity).insert(PointLight {
                    color: *color,
                    intensity: intensity * LUMENS_PER_UNIT,
                    shadows_enabled: spec.cast_shadow,
                    ..default()
                });
            }
            NodeKind::SpotLight { color, intensity } => {
                world.entity_mut(entity).insert(SpotLight {
                    color: *color,
                    intensity: intensity * LUMENS_PER_UNIT,
                    shadows_enabled: spec.cast_shadow,
                    outer_angle: std::f32::consts::FRAC_PI_3,
                    ..default()
                });
            }
            NodeKind::DirectionalLight { color, intensity } => {
                world.entity_mut(entity).insert(DirectionalLight {
                    color: *color,
                    illuminance: intensity * ILLUMINANCE_PER_UNIT,
                    shadows_enabled: spec.cast_shadow,
                    ..default()
                });
            }
        }
        world.entity_mut(parent).add_child(entity);
        entity
    }
}

/// Creates each staged geometry and material at most once, on first use.
#[derive(Default)]
struct AssetCache {
    meshes: HashMap<usize, Handle<Mesh>>,
    materials: HashMap<usize, Handle<StandardMaterial>>,
    fallback: Option<Handle<StandardMaterial>>,
}

impl AssetCache {
    fn mesh(&mut self, world: &mut World, specs: &[GeometrySpec], id: usize) -> Handle<Mesh> {
        self.meshes
            .entry(id)
            .or_insert_with(|| world.resource_mut::<Assets<Mesh>>().add(specs[id].build()))
            .clone()
    }

    fn material(
        &mut self,
        world: &mut World,
        specs: &[MaterialSpec],
        id: usize,
    ) -> Handle<StandardMaterial> {
        self.materials
            .entry(id)
            .or_insert_with(|| {
                world
                    .resource_mut::<Assets<StandardMaterial>>()
                    .add(specs[id].build())
            })
            .clone()
    }

    fn fallback_material(&mut self, world: &mut World) -> Handle<StandardMaterial> {
        self.fallback
            .get_or_insert_with(|| {
                world
                    .resource_mut::<Assets<StandardMaterial>>()
                    .add(MaterialSpec::default().build())
            })
            .clone()
    }
}

fn apply_op(world: &mut World, baseline: &Baseline, op: &StageOp) {
    match *op {
        StageOp::ClearColor(color) => world.insert_resource(ClearColor(color)),
        StageOp::Shadows(enabled) => {
            if let Some(mut light) = world.get_mut::<DirectionalLight>(baseline.directional) {
                light.shadows_enabled = enabled;
            }
        }
        _ => {
            let mut cameras = world.query_filtered::<(
                &mut Transform,
                &mut OrbitControls,
                &mut Projection,
            ), With<StageCamera>>();
            let Some((mut transform, mut controls, mut projection)) =
                cameras.iter_mut(world).next()
            else {
                warn!("[promptscene sandbox] No camera to apply {op:?} to");
                return;
            };
            match *op {
                StageOp::CameraPosition(position) => transform.translation = position,
                StageOp::CameraLookAt(target) => {
                    if transform.translation.distance_squared(target) > f32::EPSILON {
                        transform.look_at(target, Vec3::Y);
                    }
                }
                StageOp::CameraFov(degrees) => {
                    if let Projection::Perspective(perspective) = &mut *projection {
                        perspective.fov = degrees.clamp(1.0, 179.0).to_radians();
                    }
                }
                StageOp::ControlsTarget(target) => controls.target = target,
                StageOp::ControlsDamping { enabled, factor } => {
                    controls.enable_damping = enabled;
                    controls.damping_factor = factor;
                }
                StageOp::ControlsSaveState => controls.save_state(&transform),
                StageOp::ControlsReset => controls.reset(&mut transform),
                StageOp::ClearColor(_) | StageOp::Shadows(_) => {}
            }
        }
    }
}
