//! Sensor-to-body rotation transforms
//!
//! Board mounting orientations expressed as roll/pitch/yaw in degrees,
//! applied as R = Rz(yaw) * Ry(pitch) * Rx(roll).

/// Mounting rotation (numbering follows the common autopilot convention)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    None,
    Yaw45,
    Yaw90,
    Yaw135,
    Yaw180,
    Yaw225,
    Yaw270,
    Yaw315,
    Roll180,
    Roll180Yaw45,
    Roll180Yaw90,
    Roll180Yaw135,
    Pitch180,
    Roll180Yaw225,
    Roll180Yaw270,
    Roll180Yaw315,
    Roll90,
    Roll90Yaw45,
    Roll90Yaw90,
    Roll90Yaw135,
    Roll270,
    Roll270Yaw45,
    Roll270Yaw90,
    Roll270Yaw135,
    Pitch90,
    Pitch270,
}

const ROTATIONS: [Rotation; 26] = [
    Rotation::None,
    Rotation::Yaw45,
    Rotation::Yaw90,
    Rotation::Yaw135,
    Rotation::Yaw180,
    Rotation::Yaw225,
    Rotation::Yaw270,
    Rotation::Yaw315,
    Rotation::Roll180,
    Rotation::Roll180Yaw45,
    Rotation::Roll180Yaw90,
    Rotation::Roll180Yaw135,
    Rotation::Pitch180,
    Rotation::Roll180Yaw225,
    Rotation::Roll180Yaw270,
    Rotation::Roll180Yaw315,
    Rotation::Roll90,
    Rotation::Roll90Yaw45,
    Rotation::Roll90Yaw90,
    Rotation::Roll90Yaw135,
    Rotation::Roll270,
    Rotation::Roll270Yaw45,
    Rotation::Roll270Yaw90,
    Rotation::Roll270Yaw135,
    Rotation::Pitch90,
    Rotation::Pitch270,
];

impl Rotation {
    /// Look up a rotation by its numeric id
    pub fn from_index(index: u8) -> Option<Self> {
        ROTATIONS.get(index as usize).copied()
    }

    /// (roll, pitch, yaw) in degrees
    pub fn euler_deg(self) -> (f32, f32, f32) {
        match self {
            Rotation::None => (0.0, 0.0, 0.0),
            Rotation::Yaw45 => (0.0, 0.0, 45.0),
            Rotation::Yaw90 => (0.0, 0.0, 90.0),
            Rotation::Yaw135 => (0.0, 0.0, 135.0),
            Rotation::Yaw180 => (0.0, 0.0, 180.0),
            Rotation::Yaw225 => (0.0, 0.0, 225.0),
            Rotation::Yaw270 => (0.0, 0.0, 270.0),
            Rotation::Yaw315 => (0.0, 0.0, 315.0),
            Rotation::Roll180 => (180.0, 0.0, 0.0),
            Rotation::Roll180Yaw45 => (180.0, 0.0, 45.0),
            Rotation::Roll180Yaw90 => (180.0, 0.0, 90.0),
            Rotation::Roll180Yaw135 => (180.0, 0.0, 135.0),
            Rotation::Pitch180 => (0.0, 180.0, 0.0),
            Rotation::Roll180Yaw225 => (180.0, 0.0, 225.0),
            Rotation::Roll180Yaw270 => (180.0, 0.0, 270.0),
            Rotation::Roll180Yaw315 => (180.0, 0.0, 315.0),
            Rotation::Roll90 => (90.0, 0.0, 0.0),
            Rotation::Roll90Yaw45 => (90.0, 0.0, 45.0),
            Rotation::Roll90Yaw90 => (90.0, 0.0, 90.0),
            Rotation::Roll90Yaw135 => (90.0, 0.0, 135.0),
            Rotation::Roll270 => (270.0, 0.0, 0.0),
            Rotation::Roll270Yaw45 => (270.0, 0.0, 45.0),
            Rotation::Roll270Yaw90 => (270.0, 0.0, 90.0),
            Rotation::Roll270Yaw135 => (270.0, 0.0, 135.0),
            Rotation::Pitch90 => (0.0, 90.0, 0.0),
            Rotation::Pitch270 => (0.0, 270.0, 0.0),
        }
    }

    /// Rotate a vector into the body frame
    pub fn apply(self, v: [f32; 3]) -> [f32; 3] {
        if self == Rotation::None {
            return v;
        }

        let (roll, pitch, yaw) = self.euler_deg();
        let (sr, cr) = snap_sin_cos(roll);
        let (sp, cp) = snap_sin_cos(pitch);
        let (sy, cy) = snap_sin_cos(yaw);

        let [x, y, z] = v;
        [
            cy * cp * x + (cy * sp * sr - sy * cr) * y + (cy * sp * cr + sy * sr) * z,
            sy * cp * x + (sy * sp * sr + cy * cr) * y + (sy * sp * cr - cy * sr) * z,
            -sp * x + cp * sr * y + cp * cr * z,
        ]
    }
}

/// sin/cos with quarter turns snapped to exact values so axis swaps stay exact
fn snap_sin_cos(deg: f32) -> (f32, f32) {
    match deg as i32 {
        0 => (0.0, 1.0),
        90 => (1.0, 0.0),
        180 => (0.0, -1.0),
        270 => (-1.0, 0.0),
        _ => {
            let rad = deg.to_radians();
            (rad.sin(), rad.cos())
        }
    }
}
