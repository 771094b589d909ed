//! `objloc-perception` – turns detections and depth clouds into object
//! positions and orientations.
//!
//! # Modules
//!
//! - [`geometry`] – [`Vec3`][geometry::Vec3] and
//!   [`Quaternion`][geometry::Quaternion] primitives.
//! - [`segment`] – [`segment`][segment::segment]: isolates the foreground
//!   object in a cloud with a depth band above the nearest surface.
//! - [`plane`] – [`PlaneFitter`][plane::PlaneFitter] and its least-squares
//!   and PCA implementations, producing a centroid and an
//!   [`Orientation`][plane::Orientation].
//! - [`bbox`] – [`normalize`][bbox::normalize]: flips detector boxes into the
//!   bottom-to-top pixel convention.
//! - [`camera`] – [`SizeAngleEstimator`][camera::SizeAngleEstimator] and
//!   [`FrameCoordinateResolver`][camera::FrameCoordinateResolver] with
//!   pinhole implementations.
//! - [`twin_view`] – [`TwinViewFuser`][twin_view::TwinViewFuser]: merges
//!   observations of the same object seen by both lenses.

pub mod bbox;
pub mod camera;
pub mod geometry;
pub mod plane;
pub mod segment;
pub mod twin_view;
