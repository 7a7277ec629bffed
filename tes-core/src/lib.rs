//! Wire protocol, packet framing and scene-state plumbing for Third Eye
//! Scene, a real-time 3D debug-visualisation protocol.
//!
//! This crate has no notion of GPU rendering, shaders or windowing: it
//! decodes packets, tracks what each handler's state should look like,
//! and lets a caller (a live network reader, a file replay thread, a
//! recorder) drive the frame lifecycle.
//!
//! ```no_run
//! use tes_core::messages::ServerInfo;
//! use tes_core::scene::Scene;
//!
//! let scene = Scene::new(ServerInfo::default());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod category;
pub mod codec;
pub mod collated;
pub mod config;
pub mod data_buffer;
pub mod error;
pub mod handler;
pub mod id;
pub mod mesh_resource;
pub mod messages;
pub mod packet;
pub mod scene;
pub mod stream_reader;
pub mod transient;

pub use error::{Error, Result};
pub use handler::{FrameStamp, Handler};
pub use id::Id;
pub use scene::{Scene, SceneEvent};

/// Registers the default handler set every connection expects: category
/// tracking, mesh resource bookkeeping, and a generic create/update/destroy
/// lifecycle handler for every remaining addressable routing id in
/// [`packet::routing_id`] — the camera, material, and every shape kind.
///
/// Callers that only care about a subset of routing ids (e.g. a tool that
/// only inspects categories) can skip this and register handlers
/// individually via [`Scene::register_handler`].
pub fn register_default_handlers(scene: &Scene) {
    use packet::routing_id;
    use transient::TransientEntityHandler;

    scene.register_handler(Box::new(category::CategoryHandler::new()));
    scene.register_handler(Box::new(mesh_resource::MeshResourceHandler::new()));

    const SHAPE_HANDLERS: &[(u16, &str)] = &[
        (routing_id::CAMERA, "camera"),
        (routing_id::MATERIAL, "material"),
        (routing_id::SPHERE, "sphere"),
        (routing_id::BOX, "box"),
        (routing_id::CONE, "cone"),
        (routing_id::CYLINDER, "cylinder"),
        (routing_id::CAPSULE, "capsule"),
        (routing_id::PLANE, "plane"),
        (routing_id::STAR, "star"),
        (routing_id::ARROW, "arrow"),
        (routing_id::MESH_SHAPE, "mesh_shape"),
        (routing_id::MESH_SET, "mesh_set"),
        (routing_id::POINT_CLOUD_DEPRECATED, "point_cloud_deprecated"),
        (routing_id::TEXT_3D, "text3d"),
        (routing_id::TEXT_2D, "text2d"),
        (routing_id::POSE, "pose"),
    ];
    for &(id, name) in SHAPE_HANDLERS {
        scene.register_handler(Box::new(TransientEntityHandler::new(id, name)));
    }
}
