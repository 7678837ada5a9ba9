use bevy::pbr::wireframe::Wireframe;
use bevy::pbr::DirectionalLightShadowMap;
use bevy::prelude::*;
use bevy::render::mesh::PrimitiveTopology;
use bevy::render::render_asset::RenderAssetUsages;
use std::collections::HashSet;

pub const GRID_SIZE: f32 = 20.0;
pub const GRID_DIVISIONS: u32 = 20;
const GRID_CENTER_COLOR: u32 = 0x888888;
const GRID_LINE_COLOR: u32 = 0xcccccc;

const AMBIENT_COLOR: u32 = 0x404040;
const AMBIENT_INTENSITY: f32 = 0.4;
const SUN_COLOR: u32 = 0xffffff;
const SUN_INTENSITY: f32 = 0.8;
const SUN_POSITION: Vec3 = Vec3::new(10.0, 10.0, 5.0);
const SHADOW_MAP_SIZE: usize = 2048;

/// Scales a unit intensity into bevy's physical light units.
pub const AMBIENT_BRIGHTNESS_PER_UNIT: f32 = 500.0;
pub const ILLUMINANCE_PER_UNIT: f32 = 10_000.0;
pub const LUMENS_PER_UNIT: f32 = 800_000.0;

/// Parent of every scene node. Autorotation spins this entity.
#[derive(Component)]
pub struct StageRoot;

#[derive(Component, Default)]
pub struct SceneNode;

#[derive(Component, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BaselineNode {
    Ambient,
    Directional,
    Grid,
}

/// Marks content created by generated code.
#[derive(Component, Default)]
pub struct UserNode;

/// Every material a node references, in slot order. The rendered material is
/// the first slot.
#[derive(Component, Clone, Default)]
pub struct MaterialSlots(pub Vec<Handle<StandardMaterial>>);

/// Identity of the nodes that survive every reset.
#[derive(Resource, Clone, Debug)]
pub struct Baseline {
    pub stage: Entity,
    pub ambient: Entity,
    pub directional: Entity,
    pub grid: Entity,
}

impl Baseline {
    pub fn contains(&self, entity: Entity) -> bool {
        entity == self.ambient || entity == self.directional || entity == self.grid
    }
}

pub fn hex_color(hex: u32) -> Color {
    Color::srgb_u8((hex >> 16) as u8, (hex >> 8) as u8, hex as u8)
}

/// Builds the stage root and the three baseline nodes.
pub(crate) fn spawn_baseline(world: &mut World) -> Baseline {
    let stage = world
        .spawn((StageRoot, Transform::default(), Visibility::default()))
        .id();

    world.insert_resource(AmbientLight {
        color: hex_color(AMBIENT_COLOR),
        brightness: AMBIENT_INTENSITY * AMBIENT_BRIGHTNESS_PER_UNIT,
    });
    world.insert_resource(DirectionalLightShadowMap {
        size: SHADOW_MAP_SIZE,
    });
    let ambient = world
        .spawn((
            SceneNode,
            BaselineNode::Ambient,
            Name::new("ambient"),
            Transform::default(),
        ))
        .id();

    let directional = world
        .spawn((
            SceneNode,
            BaselineNode::Directional,
            Name::new("directional"),
            DirectionalLight {
                color: hex_color(SUN_COLOR),
                illuminance: SUN_INTENSITY * ILLUMINANCE_PER_UNIT,
                shadows_enabled: true,
                ..default()
            },
            Transform::from_translation(SUN_POSITION).looking_at(Vec3::ZERO, Vec3::Y),
        ))
        .id();

    let grid_mesh = world
        .resource_mut::<Assets<Mesh>>()
        .add(grid_mesh(GRID_SIZE, GRID_DIVISIONS));
    let grid_material = world
        .resource_mut::<Assets<StandardMaterial>>()
        .add(StandardMaterial {
            base_color: Color::WHITE,
            unlit: true,
            ..default()
        });
    let grid = world
        .spawn((
            SceneNode,
            BaselineNode::Grid,
            Name::new("grid"),
            Mesh3d(grid_mesh),
            MeshMaterial3d(grid_material.clone()),
            MaterialSlots(vec![grid_material]),
            Transform::default(),
        ))
        .id();

    world
        .entity_mut(stage)
        .add_children(&[ambient, directional, grid]);

    let baseline = Baseline {
        stage,
        ambient,
        directional,
        grid,
    };
    world.insert_resource(baseline.clone());
    baseline
}

/// Line-list grid on the XZ plane with a highlighted centre cross.
pub fn grid_mesh(size: f32, divisions: u32) -> Mesh {
    let divisions = divisions.max(1);
    let half = size / 2.0;
    let step = size / divisions as f32;
    let center = hex_color(GRID_CENTER_COLOR).to_linear().to_f32_array();
    let line = hex_color(GRID_LINE_COLOR).to_linear().to_f32_array();

    let mut positions = Vec::with_capacity((divisions as usize + 1) * 4);
    let mut colors = Vec::with_capacity(positions.capacity());
    for i in 0..=divisions {
        let k = -half + i as f32 * step;
        let color = if i == divisions / 2 { center } else { line };
        positions.extend([[-half, 0.0, k], [half, 0.0, k], [k, 0.0, -half], [k, 0.0, half]]);
        colors.extend([color; 4]);
    }

    Mesh::new(PrimitiveTopology::LineList, RenderAssetUsages::default())
        .with_inserted_attribute(Mesh::ATTRIBUTE_POSITION, positions)
        .with_inserted_attribute(Mesh::ATTRIBUTE_COLOR, colors)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DisposalReport {
    pub nodes: usize,
    pub meshes: usize,
    pub materials: usize,
}

/// Removes every non-baseline node and releases the assets they referenced.
///
/// Asset ids are collected across the whole sweep first, so a mesh or
/// material shared by several nodes is released once.
pub fn dispose_user_nodes(world: &mut World) -> DisposalReport {
    let Some(baseline) = world.get_resource::<Baseline>().cloned() else {
        return DisposalReport::default();
    };

    let mut doomed = Vec::new();
    let mut meshes = HashSet::new();
    let mut materials = HashSet::new();
    let mut nodes = world.query_filtered::<(
        Entity,
        Option<&Mesh3d>,
        Option<&MeshMaterial3d<StandardMaterial>>,
        Option<&MaterialSlots>,
    ), With<SceneNode>>();
    for (entity, mesh, material, slots) in nodes.iter(world) {
        if baseline.contains(entity) {
            continue;
        }
        doomed.push(entity);
        if let Some(mesh) = mesh {
            meshes.insert(mesh.0.id());
        }
        if let Some(material) = material {
            materials.insert(material.0.id());
        }
        if let Some(slots) = slots {
            materials.extend(slots.0.iter().map(|handle| handle.id()));
        }
    }

    let mut report = DisposalReport {
        nodes: doomed.len(),
        ..default()
    };
    for entity in doomed {
        // Children go with their parent.
        if world.entities().contains(entity) {
            world.entity_mut(entity).despawn_recursive();
        }
    }

    if let Some(mut assets) = world.get_resource_mut::<Assets<Mesh>>() {
        for id in meshes {
            if assets.remove(id).is_some() {
                report.meshes += 1;
            }
        }
    }
    if let Some(mut assets) = world.get_resource_mut::<Assets<StandardMaterial>>() {
        for id in materials {
            if assets.remove(id).is_some() {
                report.materials += 1;
            }
        }
    }
    report
}

/// Sets (never toggles) wireframe on every user mesh node.
pub fn apply_wireframe(world: &mut World, enabled: bool) -> usize {
    let targets: Vec<Entity> = world
        .query_filtered::<Entity, (With<UserNode>, With<Mesh3d>)>()
        .iter(world)
        .collect();
    for entity in &targets {
        if enabled {
            world.entity_mut(*entity).insert(Wireframe);
        } else {
            world.entity_mut(*entity).remove::<Wireframe>();
        }
    }
    targets.len()
}

pub fn user_node_count(world: &mut World) -> usize {
    world
        .query_filtered::<Entity, With<UserNode>>()
        .iter(world)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world_with_assets() -> World {
        let mut world = World::new();
        world.init_resource::<Assets<Mesh>>();
        world.init_resource::<Assets<StandardMaterial>>();
        world
    }

    fn spawn_user_mesh(
        world: &mut World,
        mesh: Handle<Mesh>,
        material: Handle<StandardMaterial>,
    ) -> Entity {
        world
            .spawn((
                SceneNode,
                UserNode,
                Mesh3d(mesh),
                MeshMaterial3d(material.clone()),
                MaterialSlots(vec![material]),
                Transform::default(),
            ))
            .id()
    }

    #[test]
    fn baseline_is_three_children_of_the_stage() {
        let mut world = world_with_assets();
        let baseline = spawn_baseline(&mut world);
        let children = world
            .get::<Children>(baseline.stage)
            .expect("stage children");
        assert_eq!(children.len(), 3);
        assert!(baseline.contains(baseline.grid));
        assert!(!baseline.contains(baseline.stage));
        assert_eq!(world.resource::<Assets<Mesh>>().len(), 1);
    }

    #[test]
    fn grid_has_two_lines_per_division_step() {
        let mesh = grid_mesh(GRID_SIZE, GRID_DIVISIONS);
        let positions = mesh
            .attribute(Mesh::ATTRIBUTE_POSITION)
            .expect("positions");
        assert_eq!(positions.len(), (GRID_DIVISIONS as usize + 1) * 4);
    }

    #[test]
    fn dispose_keeps_baseline_and_releases_shared_assets_once() {
        let mut world = world_with_assets();
        let baseline = spawn_baseline(&mut world);
        let mesh = world
            .resource_mut::<Assets<Mesh>>()
            .add(Cuboid::new(1.0, 1.0, 1.0));
        let material = world
            .resource_mut::<Assets<StandardMaterial>>()
            .add(StandardMaterial::default());

        let a = spawn_user_mesh(&mut world, mesh.clone(), material.clone());
        let b = spawn_user_mesh(&mut world, mesh.clone(), material.clone());
        world.entity_mut(baseline.stage).add_children(&[a, b]);

        let report = dispose_user_nodes(&mut world);
        assert_eq!(
            report,
            DisposalReport {
                nodes: 2,
                meshes: 1,
                materials: 1
            }
        );
        assert_eq!(user_node_count(&mut world), 0);
        assert!(world.entities().contains(baseline.grid));
        assert!(world.entities().contains(baseline.ambient));
        assert!(world.entities().contains(baseline.directional));
        assert!(world.resource::<Assets<Mesh>>().get(&mesh).is_none());
        assert_eq!(world.resource::<Assets<Mesh>>().len(), 1);

        assert_eq!(dispose_user_nodes(&mut world), DisposalReport::default());
    }

    #[test]
    fn nested_user_nodes_are_counted_once() {
        let mut world = world_with_assets();
        let baseline = spawn_baseline(&mut world);
        let parent = world.spawn((SceneNode, UserNode, Transform::default())).id();
        let child = world.spawn((SceneNode, UserNode, Transform::default())).id();
        world.entity_mut(parent).add_child(child);
        world.entity_mut(baseline.stage).add_child(parent);

        let report = dispose_user_nodes(&mut world);
        assert!(!world.entities().contains(child));
        assert_eq!(report.nodes, 2);
        assert_eq!(user_node_count(&mut world), 0);
    }

    #[test]
    fn wireframe_skips_the_grid() {
        let mut world = world_with_assets();
        let baseline = spawn_baseline(&mut world);
        let mesh = world
            .resource_mut::<Assets<Mesh>>()
            .add(Sphere::new(1.0));
        let material = world
            .resource_mut::<Assets<StandardMaterial>>()
            .add(StandardMaterial::default());
        let node = spawn_user_mesh(&mut world, mesh, material);

        assert_eq!(apply_wireframe(&mut world, true), 1);
        assert_eq!(apply_wireframe(&mut world, true), 1);
        assert!(world.get::<Wireframe>(node).is_some());
        assert!(world.get::<Wireframe>(baseline.grid).is_none());

        apply_wireframe(&mut world, false);
        assert!(world.get::<Wireframe>(node).is_none());
    }
}
