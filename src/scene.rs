//! Seam types toward the host rendering engine.
//!
//! Scene traversal, culling and actual GPU binding live in the host engine;
//! this module defines the narrow surface the atlas subsystem needs from it.

use crate::{settings::TraversalMask, texture::ShadowAtlasTexture, unit::ShadowCamera};
use std::collections::HashMap;

/// Identifier for a light in the host engine. The atlas treats lights as
/// opaque identities; [`LightId::NULL`] is the reserved "no light" value.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LightId(u32);

/// Identity of a single texture attachment, assigned by the receiving state
/// set when the texture is attached. Unlike the attached state hash, which
/// only keys shader compatibility, a token is never reused within one set,
/// so a later detach can verify it is removing its own attachment.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AttachmentToken(u64);

#[derive(Copy, Clone, Debug)]
struct TextureAttachment {
    token: AttachmentToken,
    state_hash: u64,
}

/// The attachment point for textures on the shadow-receiving part of the
/// scene graph. Attachments are recorded per texture unit together with the
/// hash of the attached atlas state.
#[derive(Debug, Default)]
pub struct ReceivingStateSet {
    texture_attachments: HashMap<u32, TextureAttachment>,
    next_token: u64,
}

/// The scene whose geometry receives shadows from the atlas. Owned by the
/// host; the manager keeps a shared handle to it between `initialize` and
/// teardown.
#[derive(Debug, Default)]
pub struct ShadowedScene {
    receiving_state: ReceivingStateSet,
}

/// Per-frame context passed down from the host's update traversal.
#[derive(Copy, Clone, Debug)]
pub struct UpdateContext {
    frame_number: u64,
}

/// Host-side render state that textures bind into during `apply`.
pub trait RenderState {
    /// Binds the given atlas texture at the given texture unit, creating or
    /// updating the backing GPU object from its descriptor state as needed.
    fn bind_texture(&mut self, texture_unit: u32, texture: &ShadowAtlasTexture);
}

/// Host-side culling of shadow casters for one light's shadow pass.
pub trait ShadowCasterCuller {
    /// Traverses the scene for shadow casters visible to the given shadow
    /// camera, restricted by the given traversal masks.
    fn cull_casters(
        &mut self,
        camera: &ShadowCamera,
        bounds_mask: TraversalMask,
        draw_mask: TraversalMask,
    );
}

impl LightId {
    /// The reserved "no light" identity.
    pub const NULL: Self = Self(0);

    /// Creates a light identity from a host-engine light number.
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Whether this is the reserved null identity.
    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl std::fmt::Display for LightId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ReceivingStateSet {
    /// Records an attachment of the texture state with the given hash at the
    /// given texture unit, replacing any previous attachment there. Returns
    /// the token identifying this attachment.
    pub fn attach_texture(&mut self, texture_unit: u32, state_hash: u64) -> AttachmentToken {
        let token = AttachmentToken(self.next_token);
        self.next_token += 1;
        self.texture_attachments
            .insert(texture_unit, TextureAttachment { token, state_hash });
        token
    }

    /// Returns the hash of the texture state attached at the given unit.
    pub fn texture_attachment(&self, texture_unit: u32) -> Option<u64> {
        self.texture_attachments
            .get(&texture_unit)
            .map(|attachment| attachment.state_hash)
    }

    /// Returns the token of the attachment at the given unit.
    pub fn attachment_token(&self, texture_unit: u32) -> Option<AttachmentToken> {
        self.texture_attachments
            .get(&texture_unit)
            .map(|attachment| attachment.token)
    }

    /// Removes the attachment at the given unit.
    pub fn detach_texture(&mut self, texture_unit: u32) {
        self.texture_attachments.remove(&texture_unit);
    }
}

impl ShadowedScene {
    /// Creates a scene with no texture attachments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the receiving state set.
    pub fn receiving_state(&self) -> &ReceivingStateSet {
        &self.receiving_state
    }

    /// Returns the receiving state set for modification.
    pub fn receiving_state_mut(&mut self) -> &mut ReceivingStateSet {
        &mut self.receiving_state
    }
}

impl UpdateContext {
    /// Creates a context for the given frame.
    pub fn new(frame_number: u64) -> Self {
        Self { frame_number }
    }

    /// Returns the number of the frame being traversed.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }
}
