use std::fmt;

use glam::Vec2;

use crate::physics::{Collider, ColliderClass, ColliderId, ColliderShape, LayerMask, StaticScene};
use crate::teleport::{Pose, PortalTransform, TeleportError, TeleportTransform};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortalId(pub usize);

/// Texture slot owned by the render backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderTargetId(pub u32);

/// Auxiliary camera that renders the partner side of a portal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoutCamera {
    pub pose: Pose,
}

#[derive(Debug, Clone)]
pub struct PortalEndpoint {
    pub name: String,
    pub transform: PortalTransform,
    pub half_extents: Vec2,
    pub partner: Option<PortalId>,
    pub render_target: Option<RenderTargetId>,
    pub scout: Option<ScoutCamera>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PortalSetupError {
    UnknownPortal(PortalId),
    MissingPartner { portal: String },
    AsymmetricLink { portal: String, partner: String },
    MissingScoutCamera { portal: String },
    MissingRenderTarget { portal: String },
    Teleport { portal: String, source: TeleportError },
}

impl fmt::Display for PortalSetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownPortal(id) => write!(f, "no portal with id {}", id.0),
            Self::MissingPartner { portal } => write!(f, "portal '{portal}' has no partner"),
            Self::AsymmetricLink { portal, partner } => {
                write!(f, "portal '{portal}' links to '{partner}' but not the other way round")
            }
            Self::MissingScoutCamera { portal } => {
                write!(f, "portal '{portal}' has no scout camera")
            }
            Self::MissingRenderTarget { portal } => {
                write!(f, "portal '{portal}' has no render target")
            }
            Self::Teleport { portal, source } => {
                write!(f, "portal '{portal}' cannot teleport: {source}")
            }
        }
    }
}

impl std::error::Error for PortalSetupError {}

/// Owns every portal endpoint and keeps the partner relation symmetric.
#[derive(Debug, Default)]
pub struct PortalNetwork {
    portals: Vec<PortalEndpoint>,
}

impl PortalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, transform: PortalTransform, half_extents: Vec2) -> PortalId {
        let id = PortalId(self.portals.len());
        self.portals.push(PortalEndpoint {
            name: name.into(),
            transform,
            half_extents,
            partner: None,
            render_target: None,
            scout: None,
        });
        id
    }

    pub fn len(&self) -> usize {
        self.portals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.portals.is_empty()
    }

    pub fn get(&self, id: PortalId) -> Option<&PortalEndpoint> {
        self.portals.get(id.0)
    }

    pub fn get_mut(&mut self, id: PortalId) -> Option<&mut PortalEndpoint> {
        self.portals.get_mut(id.0)
    }

    pub fn ids(&self) -> impl Iterator<Item = PortalId> {
        (0..self.portals.len()).map(PortalId)
    }

    pub fn partner(&self, id: PortalId) -> Option<PortalId> {
        self.get(id).and_then(|portal| portal.partner)
    }

    /// Pairs `a` with `b`, breaking any previous pairing either had.
    pub fn link(&mut self, a: PortalId, b: PortalId) -> Result<(), PortalSetupError> {
        for id in [a, b] {
            if self.get(id).is_none() {
                return Err(PortalSetupError::UnknownPortal(id));
            }
        }

        self.unlink(a);
        self.unlink(b);
        self.portals[a.0].partner = Some(b);
        self.portals[b.0].partner = Some(a);
        Ok(())
    }

    pub fn unlink(&mut self, id: PortalId) {
        let Some(partner) = self.get_mut(id).and_then(|portal| portal.partner.take()) else {
            return;
        };
        if let Some(other) = self.get_mut(partner) {
            if other.partner == Some(id) {
                other.partner = None;
            }
        }
    }

    pub fn set_render_target(&mut self, id: PortalId, target: RenderTargetId) {
        if let Some(portal) = self.get_mut(id) {
            portal.render_target = Some(target);
        }
    }

    pub fn attach_scout(&mut self, id: PortalId) {
        if let Some(portal) = self.get_mut(id) {
            let pose = Pose::new(portal.transform.position, portal.transform.rotation);
            portal.scout = Some(ScoutCamera { pose });
        }
    }

    /// Transform applied to anything entering `source`.
    pub fn teleport_from(&self, source: PortalId) -> Result<TeleportTransform, PortalSetupError> {
        let portal = self
            .get(source)
            .ok_or(PortalSetupError::UnknownPortal(source))?;
        let partner_id = portal.partner.ok_or_else(|| PortalSetupError::MissingPartner {
            portal: portal.name.clone(),
        })?;
        let partner = self
            .get(partner_id)
            .ok_or(PortalSetupError::UnknownPortal(partner_id))?;
        TeleportTransform::between(&portal.transform, &partner.transform).map_err(|source| {
            PortalSetupError::Teleport {
                portal: portal.name.clone(),
                source,
            }
        })
    }

    /// Registers a teleport trigger covering the portal face.
    pub fn add_trigger(&self, id: PortalId, scene: &mut StaticScene) -> Result<ColliderId, PortalSetupError> {
        let portal = self.get(id).ok_or(PortalSetupError::UnknownPortal(id))?;
        let transform = &portal.transform;
        Ok(scene.add(Collider {
            shape: ColliderShape::Quad {
                center: transform.position,
                normal: transform.normal(),
                right: transform.right(),
                up: transform.up(),
                half_extents: portal.half_extents,
            },
            class: ColliderClass::TeleportTrigger(id),
            layer: LayerMask::PORTAL_TRIGGER,
        }))
    }

    /// Setup-time check for everything the per-frame paths silently skip.
    pub fn validate(&self) -> Vec<PortalSetupError> {
        let mut problems = Vec::new();
        for (index, portal) in self.portals.iter().enumerate() {
            let id = PortalId(index);
            match portal.partner {
                None => problems.push(PortalSetupError::MissingPartner {
                    portal: portal.name.clone(),
                }),
                Some(partner_id) => match self.get(partner_id) {
                    None => problems.push(PortalSetupError::UnknownPortal(partner_id)),
                    Some(partner) if partner.partner != Some(id) => {
                        problems.push(PortalSetupError::AsymmetricLink {
                            portal: portal.name.clone(),
                            partner: partner.name.clone(),
                        });
                    }
                    Some(_) => {
                        if let Err(err) = self.teleport_from(id) {
                            problems.push(err);
                        }
                    }
                },
            }
            if portal.scout.is_none() {
                problems.push(PortalSetupError::MissingScoutCamera {
                    portal: portal.name.clone(),
                });
            }
            if portal.render_target.is_none() {
                problems.push(PortalSetupError::MissingRenderTarget {
                    portal: portal.name.clone(),
                });
            }
        }
        problems
    }
}
