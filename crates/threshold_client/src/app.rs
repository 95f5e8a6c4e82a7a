use std::f32::consts::PI;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::{Quat, Vec2, Vec3};
use rustc_hash::FxHashMap;
use threshold_core::jobs::{JobSystem, ThreadPoolBuildError};
use threshold_shared::physics::StaticScene;
use threshold_shared::portal::{PortalId, PortalNetwork, PortalSetupError, RenderTargetId};
use threshold_shared::ray_trace::{RayTraceMover, TraceOptions};
use threshold_shared::teleport::{Pose, PortalTransform};
use threshold_shared::worldgen::LayeredNoise;
use tracing::{debug, info, warn};

use crate::camera::Camera;
use crate::renderer::portal_renderer::{
    PortalFrameStats, PortalRenderBackend, PortalRenderer, ScoutView, SurfaceMaterial,
};
use crate::settings::{load_or_create_settings, ClientSettings};
use crate::terrain::chunk_cache::{ChunkCache, ChunkCacheConfigError};
use crate::terrain::controller::TerrainController;

const TICK_RATE: u32 = 30;
const TICK_DURATION: Duration = Duration::from_millis(1000 / TICK_RATE as u64);
const STATS_INTERVAL_TICKS: u64 = TICK_RATE as u64;
const EYE_HEIGHT: f32 = 1.7;
/// Distance walked after a teleport before the walker turns back.
const LEG_LENGTH: f32 = 60.0;
const PORTAL_HALF_EXTENTS: Vec2 = Vec2::new(1.0, 1.5);
const EXIT_PORTAL_POSITION: Vec3 = Vec3::new(320.0, EYE_HEIGHT, 320.0);

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub settings_path: PathBuf,
    /// Stop after this many ticks instead of waiting for a shutdown signal.
    pub max_ticks: Option<u64>,
}

#[derive(Debug)]
pub enum AppError {
    Jobs(ThreadPoolBuildError),
    ChunkCache(ChunkCacheConfigError),
    PortalSetup(PortalSetupError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jobs(err) => write!(f, "failed to start generation workers: {err}"),
            Self::ChunkCache(err) => write!(f, "invalid terrain settings: {err}"),
            Self::PortalSetup(err) => write!(f, "invalid portal layout: {err}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<ThreadPoolBuildError> for AppError {
    fn from(err: ThreadPoolBuildError) -> Self {
        Self::Jobs(err)
    }
}

impl From<ChunkCacheConfigError> for AppError {
    fn from(err: ChunkCacheConfigError) -> Self {
        Self::ChunkCache(err)
    }
}

impl From<PortalSetupError> for AppError {
    fn from(err: PortalSetupError) -> Self {
        Self::PortalSetup(err)
    }
}

pub fn run(config: AppConfig, running: Arc<AtomicBool>) -> Result<(), AppError> {
    let settings = load_or_create_settings(&config.settings_path);
    info!(
        "Starting threshold (seed {}, view radius {}, settings: {})",
        settings.seed,
        settings.view_radius,
        config.settings_path.display()
    );

    let mut sim = Simulation::new(settings)?;
    while running.load(Ordering::SeqCst) {
        if config.max_ticks.is_some_and(|max| sim.tick >= max) {
            break;
        }
        let tick_start = Instant::now();

        sim.step(TICK_DURATION.as_secs_f32());
        if sim.tick % STATS_INTERVAL_TICKS == 0 {
            sim.log_stats();
        }

        let elapsed = tick_start.elapsed();
        if elapsed < TICK_DURATION {
            std::thread::sleep(TICK_DURATION - elapsed);
        }
    }

    sim.log_stats();
    info!("Stopped after {} ticks", sim.tick);
    Ok(())
}

/// Stands in for the GPU: counts passes and the uniform bytes a real
/// renderer would upload.
#[derive(Default)]
pub struct HeadlessBackend {
    passes: u64,
    uploaded_bytes: u64,
    materials: FxHashMap<PortalId, SurfaceMaterial>,
}

impl HeadlessBackend {
    pub fn passes(&self) -> u64 {
        self.passes
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.uploaded_bytes
    }

    pub fn material(&self, portal: PortalId) -> Option<SurfaceMaterial> {
        self.materials.get(&portal).copied()
    }
}

impl PortalRenderBackend for HeadlessBackend {
    fn render_to_texture(&mut self, view: &ScoutView, target: RenderTargetId) {
        let uniform = view.uniform();
        self.uploaded_bytes += bytemuck::bytes_of(&uniform).len() as u64;
        self.passes += 1;
        debug!(
            "scout pass for portal {} into target {} at depth {}",
            view.portal.0, target.0, view.depth
        );
    }

    fn set_surface_material(&mut self, portal: PortalId, material: SurfaceMaterial) {
        self.materials.insert(portal, material);
    }
}

/// A walker pacing between a walled room and open terrain through one
/// portal pair, with terrain streaming around wherever it stands.
pub struct Simulation {
    settings: ClientSettings,
    scene: StaticScene,
    portals: PortalNetwork,
    camera: Camera,
    leg_travelled: f32,
    terrain: TerrainController,
    cache: ChunkCache,
    renderer: PortalRenderer,
    backend: HeadlessBackend,
    frame: PortalFrameStats,
    tick: u64,
    teleports: u64,
}

impl Simulation {
    pub fn new(settings: ClientSettings) -> Result<Self, AppError> {
        let jobs = Arc::new(JobSystem::new(settings.worker_threads())?);
        let source = Arc::new(LayeredNoise::hills(settings.seed));
        let cache = ChunkCache::new(settings.chunk_cache_config(), jobs, source)?;
        let (portals, scene) = build_level()?;
        for problem in portals.validate() {
            warn!("{problem}");
        }

        let camera = Camera {
            pose: Pose::new(Vec3::new(0.0, EYE_HEIGHT, 0.0), Quat::IDENTITY),
            fov: settings.fov.to_radians(),
            ..Camera::default()
        };
        let renderer = PortalRenderer::new(settings.portal_render_config());

        Ok(Self {
            settings,
            scene,
            portals,
            camera,
            leg_travelled: 0.0,
            terrain: TerrainController::new(),
            cache,
            renderer,
            backend: HeadlessBackend::default(),
            frame: PortalFrameStats::default(),
            tick: 0,
            teleports: 0,
        })
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn cache(&self) -> &ChunkCache {
        &self.cache
    }

    pub fn backend(&self) -> &HeadlessBackend {
        &self.backend
    }

    pub fn teleports(&self) -> u64 {
        self.teleports
    }

    /// One fixed tick: move, stream terrain, then draw portal views.
    pub fn step(&mut self, dt: f32) {
        self.walk(dt);
        self.terrain.update(self.camera.pose.position, &mut self.cache);
        self.frame = self
            .renderer
            .render_frame(&mut self.portals, &self.camera, &mut self.backend);
        self.tick += 1;
    }

    fn walk(&mut self, dt: f32) {
        let mover = RayTraceMover::new(&self.scene, &self.portals);
        let result = mover.advance(
            self.camera.pose,
            self.settings.walk_speed * dt,
            TraceOptions::default(),
        );

        self.camera.pose.position = result.pose.position;
        self.camera.apply_rotation_delta(result.rotation_delta);
        if result.teleports > 0 {
            self.teleports += u64::from(result.teleports);
            self.leg_travelled = 0.0;
            info!("Teleported to {:.1}", self.camera.pose.position);
        }
        self.leg_travelled += result.travelled;

        if result.blocked || self.leg_travelled > LEG_LENGTH {
            self.camera.turn(PI);
            self.leg_travelled = 0.0;
        }
    }

    fn log_stats(&self) {
        let stats = self.cache.stats();
        let position = self.camera.pose.position;
        let ground = self
            .cache
            .height_at(position.x, position.z)
            .map_or_else(|| "unloaded".to_string(), |height| format!("{height:.1}"));
        info!(
            "tick {}: pos {:.1} ground {} | chunks loaded {} queued {} generating {}/{} pooled {} | portals rendered {} (+{} nested) back-facing {} off-screen {} | teleports {} | uniform bytes {}",
            self.tick,
            position,
            ground,
            stats.loaded,
            stats.to_generate_height + stats.height_ready,
            stats.generating_height,
            stats.generating_texture,
            stats.pooled,
            self.frame.rendered,
            self.frame.nested_rendered,
            self.frame.back_facing,
            self.frame.out_of_view,
            self.teleports,
            self.backend.uploaded_bytes()
        );
    }
}

/// A short walled room whose far end holds portal "room"; its partner
/// "field" stands out on the terrain.
fn build_level() -> Result<(PortalNetwork, StaticScene), PortalSetupError> {
    let mut portals = PortalNetwork::new();
    let room = portals.add(
        "room",
        PortalTransform::new(Vec3::new(0.0, EYE_HEIGHT, -6.0), Quat::IDENTITY),
        PORTAL_HALF_EXTENTS,
    );
    let field = portals.add(
        "field",
        PortalTransform::new(EXIT_PORTAL_POSITION, Quat::from_rotation_y(-PI / 2.0)),
        PORTAL_HALF_EXTENTS,
    );
    portals.link(room, field)?;
    for (index, id) in [room, field].into_iter().enumerate() {
        portals.attach_scout(id);
        portals.set_render_target(id, RenderTargetId(index as u32));
    }

    let mut scene = StaticScene::new();
    portals.add_trigger(room, &mut scene)?;
    portals.add_trigger(field, &mut scene)?;
    // Back wall and side walls of the room.
    scene.add_solid_box(Vec3::new(-3.0, 0.0, 8.0), Vec3::new(3.0, 4.0, 9.0));
    scene.add_solid_box(Vec3::new(-4.0, 0.0, -7.0), Vec3::new(-3.0, 4.0, 9.0));
    scene.add_solid_box(Vec3::new(3.0, 0.0, -7.0), Vec3::new(4.0, 4.0, 9.0));
    Ok((portals, scene))
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use threshold_shared::coords::ChunkKey;
    use threshold_shared::portal::{PortalId, RenderTargetId};

    use super::{build_level, Simulation, EXIT_PORTAL_POSITION};
    use crate::renderer::portal_renderer::SurfaceMaterial;
    use crate::settings::ClientSettings;

    fn small_settings() -> ClientSettings {
        ClientSettings {
            chunk_resolution: 9,
            chunk_length: 16.0,
            view_radius: 2,
            worker_threads: 2,
            walk_speed: 6.0,
            ..ClientSettings::default()
        }
    }

    #[test]
    fn level_is_fully_configured() {
        let (portals, scene) = build_level().expect("level");
        assert!(portals.validate().is_empty());
        assert_eq!(portals.len(), 2);
        assert_eq!(scene.len(), 5);
    }

    #[test]
    fn walker_reaches_the_field_and_comes_back() {
        let mut sim = Simulation::new(small_settings()).expect("simulation");
        let dt = 0.1;

        // Six units to the room portal at 0.6 units per tick.
        for _ in 0..12 {
            sim.step(dt);
        }
        assert_eq!(sim.teleports(), 1);
        let position = sim.camera().pose.position;
        assert!((position - EXIT_PORTAL_POSITION).length() < 8.0, "{position}");
        // The room portal was drawn while the walker approached it.
        assert_eq!(
            sim.backend().material(PortalId(0)),
            Some(SurfaceMaterial::PortalView(RenderTargetId(0)))
        );

        // Out along the leg, turn, and back through the field portal.
        for _ in 0..250 {
            sim.step(dt);
            if sim.teleports() >= 2 {
                break;
            }
        }
        assert_eq!(sim.teleports(), 2);
        let position = sim.camera().pose.position;
        // Back in the room, heading for the back wall.
        assert!(position.x.abs() < 1.0 && (-7.0..8.0).contains(&position.z), "{position}");
        assert!(sim.camera().forward_direction().abs_diff_eq(glam::Vec3::Z, 1e-4));
        assert!(sim.backend().passes() > 0);
    }

    #[test]
    fn terrain_follows_the_walker() {
        let mut sim = Simulation::new(small_settings()).expect("simulation");
        for _ in 0..12 {
            sim.step(0.1);
        }
        let position = sim.camera().pose.position;
        let settled = |sim: &Simulation| {
            sim.cache().height_at(position.x, position.z).is_some()
                && !sim.cache().is_tracked(ChunkKey::new(0, 0))
        };
        for _ in 0..5_000 {
            if settled(&sim) {
                break;
            }
            sim.step(0.0);
            thread::sleep(Duration::from_millis(1));
        }
        assert!(settled(&sim), "{:?}", sim.cache().stats());
        assert!(sim.cache().height_at(0.0, 0.0).is_none());
        assert_eq!(sim.cache().stats().total(), sim.cache().pool_size());
    }
}
