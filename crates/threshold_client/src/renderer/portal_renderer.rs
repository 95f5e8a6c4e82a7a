use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use threshold_shared::portal::{PortalId, PortalNetwork, RenderTargetId, ScoutCamera};
use tracing::debug;

use crate::camera::{extract_frustum_planes, sphere_in_frustum, Camera};

pub const DEFAULT_MAX_RECURSION: u32 = 1;
pub const DEFAULT_CLIP_PLANE_OFFSET: f32 = 0.025;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortalRenderConfig {
    /// Portal levels rendered per frame. One renders every portal seen
    /// directly by the viewer; portals seen through them show last frame.
    pub max_recursion: u32,
    /// Pushes the clip plane past the partner surface to avoid z-fighting
    /// at the seam.
    pub clip_plane_offset: f32,
}

impl Default for PortalRenderConfig {
    fn default() -> Self {
        Self {
            max_recursion: DEFAULT_MAX_RECURSION,
            clip_plane_offset: DEFAULT_CLIP_PLANE_OFFSET,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceMaterial {
    PortalView(RenderTargetId),
    /// Used when the surface is seen from behind.
    Passthrough,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    RecursionLimit,
    UnknownPortal,
    MissingPartner,
    MissingScoutCamera,
    MissingRenderTarget,
    InvalidTransform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalRenderOutcome {
    Rendered,
    /// Viewer is behind the portal plane.
    BackFacing,
    OutOfView,
    Skipped(SkipReason),
}

/// Everything a backend needs to draw one scout camera pass.
#[derive(Debug, Clone)]
pub struct ScoutView {
    pub portal: PortalId,
    pub camera: Camera,
    pub view: Mat4,
    /// Projection with the near plane replaced by the partner surface.
    pub projection: Mat4,
    pub clip_plane_world: Vec4,
    pub clip_plane_view: Vec4,
    pub depth: u32,
}

impl ScoutView {
    pub fn view_proj(&self) -> Mat4 {
        self.projection * self.view
    }

    pub fn uniform(&self) -> ScoutViewUniform {
        ScoutViewUniform {
            view_proj: self.view_proj().to_cols_array_2d(),
            clip_plane: self.clip_plane_world.to_array(),
            camera_position: self.camera.pose.position.extend(1.0).to_array(),
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct ScoutViewUniform {
    pub view_proj: [[f32; 4]; 4],
    pub clip_plane: [f32; 4],
    pub camera_position: [f32; 4],
}

/// Renderer collaborator for portal passes.
pub trait PortalRenderBackend {
    fn render_to_texture(&mut self, view: &ScoutView, target: RenderTargetId);
    fn set_surface_material(&mut self, portal: PortalId, material: SurfaceMaterial);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortalFrameStats {
    pub rendered: u32,
    pub back_facing: u32,
    pub out_of_view: u32,
    pub skipped: u32,
    /// Scout passes rendered for portals seen through other portals.
    pub nested_rendered: u32,
}

impl PortalFrameStats {
    fn record(&mut self, outcome: PortalRenderOutcome) {
        match outcome {
            PortalRenderOutcome::Rendered => self.rendered += 1,
            PortalRenderOutcome::BackFacing => self.back_facing += 1,
            PortalRenderOutcome::OutOfView => self.out_of_view += 1,
            PortalRenderOutcome::Skipped(_) => self.skipped += 1,
        }
    }
}

pub struct PortalRenderer {
    config: PortalRenderConfig,
    stats: PortalFrameStats,
}

impl PortalRenderer {
    pub fn new(config: PortalRenderConfig) -> Self {
        Self {
            config,
            stats: PortalFrameStats::default(),
        }
    }

    pub fn config(&self) -> &PortalRenderConfig {
        &self.config
    }

    /// Updates every portal surface for one frame seen by `viewer`.
    pub fn render_frame<B: PortalRenderBackend>(
        &mut self,
        network: &mut PortalNetwork,
        viewer: &Camera,
        backend: &mut B,
    ) -> PortalFrameStats {
        self.stats = PortalFrameStats::default();
        let ids: Vec<PortalId> = network.ids().collect();
        for id in ids {
            self.render_portal(network, id, viewer, 0, backend);
        }
        self.stats
    }

    /// Renders the view through `id` as seen by `viewer`, `depth` portals
    /// deep. Portals visible from the resulting scout camera are rendered
    /// first, one level deeper, while the depth allows it.
    ///
    /// Only the top level binds surface materials; they belong to what the
    /// real viewer sees. Only the top level counts in the frame stats, apart
    /// from `nested_rendered`.
    pub fn render_portal<B: PortalRenderBackend>(
        &mut self,
        network: &mut PortalNetwork,
        id: PortalId,
        viewer: &Camera,
        depth: u32,
        backend: &mut B,
    ) -> PortalRenderOutcome {
        let outcome = self.render_portal_inner(network, id, viewer, depth, backend);
        if depth == 0 {
            self.stats.record(outcome);
        } else if outcome == PortalRenderOutcome::Rendered {
            self.stats.nested_rendered += 1;
        }
        outcome
    }

    fn render_portal_inner<B: PortalRenderBackend>(
        &mut self,
        network: &mut PortalNetwork,
        id: PortalId,
        viewer: &Camera,
        depth: u32,
        backend: &mut B,
    ) -> PortalRenderOutcome {
        if depth >= self.config.max_recursion {
            return PortalRenderOutcome::Skipped(SkipReason::RecursionLimit);
        }
        let Some(portal) = network.get(id) else {
            return PortalRenderOutcome::Skipped(SkipReason::UnknownPortal);
        };
        let Some(partner_id) = portal.partner else {
            return PortalRenderOutcome::Skipped(SkipReason::MissingPartner);
        };
        let Some(partner) = network.get(partner_id) else {
            return PortalRenderOutcome::Skipped(SkipReason::MissingPartner);
        };
        if portal.scout.is_none() {
            return PortalRenderOutcome::Skipped(SkipReason::MissingScoutCamera);
        }
        let Some(target) = portal.render_target else {
            return PortalRenderOutcome::Skipped(SkipReason::MissingRenderTarget);
        };

        if portal.transform.signed_distance(viewer.pose.position) <= 0.0 {
            if depth == 0 {
                backend.set_surface_material(id, SurfaceMaterial::Passthrough);
            }
            return PortalRenderOutcome::BackFacing;
        }

        let frustum = extract_frustum_planes(viewer.view_projection_matrix());
        let radius = (portal.half_extents.length() * portal.transform.scale.max_element()).max(0.5);
        if !sphere_in_frustum(&frustum, portal.transform.position, radius) {
            return PortalRenderOutcome::OutOfView;
        }

        let teleport = match network.teleport_from(id) {
            Ok(teleport) => teleport,
            Err(err) => {
                debug!("portal {} not rendered: {err}", id.0);
                return PortalRenderOutcome::Skipped(SkipReason::InvalidTransform);
            }
        };
        let scout_camera = viewer.with_pose(teleport.pose(&viewer.pose));
        let partner_center = partner.transform.position;
        let partner_normal = partner.transform.normal();
        let view = build_scout_view(
            id,
            scout_camera,
            partner_center,
            partner_normal,
            self.config.clip_plane_offset,
            depth,
        );

        if let Some(endpoint) = network.get_mut(id) {
            endpoint.scout = Some(ScoutCamera {
                pose: view.camera.pose,
            });
        }

        if depth + 1 < self.config.max_recursion {
            let nested: Vec<PortalId> = network.ids().collect();
            for nested_id in nested {
                self.render_portal(network, nested_id, &view.camera, depth + 1, backend);
            }
        }

        backend.render_to_texture(&view, target);
        if depth == 0 {
            backend.set_surface_material(id, SurfaceMaterial::PortalView(target));
        }
        PortalRenderOutcome::Rendered
    }
}

impl Default for PortalRenderer {
    fn default() -> Self {
        Self::new(PortalRenderConfig::default())
    }
}

fn build_scout_view(
    portal: PortalId,
    camera: Camera,
    partner_center: Vec3,
    partner_normal: Vec3,
    clip_plane_offset: f32,
    depth: u32,
) -> ScoutView {
    let view = camera.view_matrix();
    let projection = camera.projection_matrix();

    // Keep only what lies on the far side of the partner surface.
    let clip_normal = if (camera.pose.position - partner_center).dot(partner_normal) >= 0.0 {
        -partner_normal
    } else {
        partner_normal
    };
    let clip_point = partner_center + clip_normal * clip_plane_offset;
    let clip_plane_world = clip_normal.extend(-clip_normal.dot(clip_point));
    let clip_plane_view = view.inverse().transpose() * clip_plane_world;

    ScoutView {
        portal,
        projection: apply_oblique_clip(projection, clip_plane_view),
        camera,
        view,
        clip_plane_world,
        clip_plane_view,
        depth,
    }
}

/// Replaces the near plane of a 0..1 depth projection with `clip_plane_camera`
/// and moves the far plane so it still bounds the frustum.
fn apply_oblique_clip(proj: Mat4, clip_plane_camera: Vec4) -> Mat4 {
    if clip_plane_camera.w >= 0.0 {
        // Camera on the kept side: the plane would cut away the whole view.
        return proj;
    }

    let q = proj.inverse()
        * Vec4::new(
            clip_plane_camera.x.signum(),
            clip_plane_camera.y.signum(),
            1.0,
            1.0,
        );
    let denom = clip_plane_camera.dot(q);
    if denom.abs() < 1e-5 {
        return proj;
    }

    let c = clip_plane_camera / denom;
    let mut m = proj.to_cols_array_2d();
    m[0][2] = c.x;
    m[1][2] = c.y;
    m[2][2] = c.z;
    m[3][2] = c.w;
    Mat4::from_cols_array_2d(&m)
}
