//! Camera and view management.

use glam::{Mat4, Quat, Vec2, Vec3};

use crate::config::CameraConfig;

/// Position, rotation and scale of the camera in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Local-to-world matrix.
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    /// World-to-view matrix for a camera placed at this transform.
    ///
    /// The transform is the camera's placement in the world, so the view is
    /// its inverse: panning the camera right moves the scene left. Using
    /// [`Self::matrix`] directly would move the scene with the camera.
    pub fn view_matrix(&self) -> Mat4 {
        self.matrix().inverse()
    }
}

/// 2D orthographic camera.
///
/// `bounds` is the full horizontal extent of the visible region in world units.
#[derive(Debug, Clone)]
pub struct OrthoCamera {
    pub transform: Transform,
    pub bounds: f32,
    pub near: f32,
    pub far: f32,
    pub min_bounds: f32,
}

impl Default for OrthoCamera {
    fn default() -> Self {
        Self::from_config(&CameraConfig::default())
    }
}

impl OrthoCamera {
    pub fn from_config(config: &CameraConfig) -> Self {
        Self {
            transform: Transform::default(),
            bounds: config.bounds,
            near: config.near,
            far: config.far,
            min_bounds: config.min_bounds,
        }
    }

    /// Shrink (positive `amount`) or grow the visible region.
    pub fn zoom(&mut self, amount: f32, zoom_speed: f32, dt: f32) {
        self.bounds = (self.bounds - amount * zoom_speed * dt).max(self.min_bounds);
    }

    /// Move the camera in the view plane.
    pub fn pan(&mut self, direction: Vec2, speed: f32, dt: f32) {
        self.transform.position += (direction * speed * dt).extend(0.0);
    }

    pub fn view_matrix(&self) -> Mat4 {
        self.transform.view_matrix()
    }

    /// Orthographic projection with the clip-space Y flip applied.
    ///
    /// `viewport_aspect` is height / width of the render target.
    pub fn projection_matrix(&self, viewport_aspect: f32) -> Mat4 {
        orthographic_projection(self.bounds, viewport_aspect, self.near, self.far)
    }
}

/// Height / width of a render target, the factor applied to the vertical
/// half-extent of the orthographic volume.
pub fn viewport_aspect(width: u32, height: u32) -> f32 {
    height as f32 / width.max(1) as f32
}

/// Orthographic volume spanning `±bounds/2` horizontally and
/// `±bounds/2 * viewport_aspect` vertically, before the Y flip.
pub fn unflipped_orthographic(bounds: f32, viewport_aspect: f32, near: f32, far: f32) -> Mat4 {
    let half_width = bounds / 2.0;
    let half_height = half_width * viewport_aspect;
    Mat4::orthographic_rh(-half_width, half_width, -half_height, half_height, near, far)
}

/// [`unflipped_orthographic`] with the `[1][1]` entry negated, since Vulkan
/// clip space has Y pointing down.
pub fn orthographic_projection(bounds: f32, viewport_aspect: f32, near: f32, far: f32) -> Mat4 {
    let mut projection = unflipped_orthographic(bounds, viewport_aspect, near, far);
    projection.y_axis.y *= -1.0;
    projection
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn default_transform_gives_identity_view() {
        assert_eq!(Transform::default().view_matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn view_matrix_moves_world_opposite_to_camera() {
        let transform = Transform::from_position(Vec3::new(3.0, -2.0, 0.0));
        let p = transform.view_matrix().transform_point3(Vec3::new(3.0, -2.0, 0.0));
        assert_relative_eq!(p.x, 0.0);
        assert_relative_eq!(p.y, 0.0);
    }

    #[test]
    fn projection_bounds_for_800x600() {
        let aspect = viewport_aspect(800, 600);
        assert_relative_eq!(aspect, 0.75);

        let natural = unflipped_orthographic(2.0, aspect, 0.1, 1000.0);
        // left/right = ±1.0, top/bottom = ±0.75
        assert_relative_eq!(natural.x_axis.x, 2.0 / 2.0);
        assert_relative_eq!(natural.y_axis.y, 2.0 / 1.5);

        let flipped = orthographic_projection(2.0, aspect, 0.1, 1000.0);
        assert_relative_eq!(flipped.y_axis.y, -natural.y_axis.y);
        assert_relative_eq!(flipped.x_axis.x, natural.x_axis.x);
        assert_relative_eq!(flipped.z_axis.z, natural.z_axis.z);
        assert_relative_eq!(flipped.w_axis.z, natural.w_axis.z);
    }

    #[test]
    fn flipped_projection_maps_top_edge_to_negative_y() {
        let projection = orthographic_projection(2.0, 0.75, 0.1, 1000.0);
        let top = projection.project_point3(Vec3::new(0.0, 0.75, -1.0));
        assert_relative_eq!(top.y, -1.0, epsilon = 1e-6);
        let right = projection.project_point3(Vec3::new(1.0, 0.0, -1.0));
        assert_relative_eq!(right.x, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn zoom_is_clamped() {
        let mut camera = OrthoCamera::default();
        camera.zoom(1.0, 5.0, 0.1);
        assert_relative_eq!(camera.bounds, 1.5);

        camera.zoom(100.0, 5.0, 1.0);
        assert_relative_eq!(camera.bounds, camera.min_bounds);

        camera.zoom(-1.0, 5.0, 0.2);
        assert_relative_eq!(camera.bounds, camera.min_bounds + 1.0);
    }

    #[test]
    fn pan_moves_in_view_plane() {
        let mut camera = OrthoCamera::default();
        camera.pan(Vec2::new(1.0, -1.0), 10.0, 0.5);
        assert_eq!(camera.transform.position, Vec3::new(5.0, -5.0, 0.0));
    }
}
