//! Live camera capture with a liveness-gated countdown and single-shot delivery.
//!
//! A host builds a [`SessionConfig`] around a [`CameraDevice`] and a
//! [`SessionObserver`], spawns the session, and drives it through the returned
//! [`SessionHandle`]:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use face_capture::{SessionConfig, SessionCoordinator, SyntheticCamera, SessionObserver};
//! # async fn run(observer: Arc<dyn SessionObserver>) -> Result<(), face_capture::SessionError> {
//! let camera = Arc::new(SyntheticCamera::new());
//! let session = SessionCoordinator::spawn(SessionConfig::new(camera, observer));
//!
//! session.start().await?;
//! // ...once status().ready is true
//! session.arm().await?;
//! // ...once the state is Verified
//! session.confirm().await?;
//! # Ok(())
//! # }
//! ```

pub mod camera;
pub mod core;
pub mod shared;

pub use camera::*;
pub use crate::core::settings::{load_settings, save_settings, CaptureSettings};
