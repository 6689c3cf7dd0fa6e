//! Attribute keys known to the default transformation builders.

use crate::model::FloatKey;

pub const X: FloatKey = FloatKey::new("x");
pub const Y: FloatKey = FloatKey::new("y");
pub const Z: FloatKey = FloatKey::new("z");

pub const XYZ: [FloatKey; 3] = [X, Y, Z];

/// Local coordinates of a non-rigid member of a rigid body.
pub const LOCAL_XYZ: [FloatKey; 3] = [
    FloatKey::new("rigid_body_local_x"),
    FloatKey::new("rigid_body_local_y"),
    FloatKey::new("rigid_body_local_z"),
];

pub const RADIUS: FloatKey = FloatKey::new("radius");

pub const QUATERNION: [FloatKey; 4] = [
    FloatKey::new("rigid_body_quaternion_0"),
    FloatKey::new("rigid_body_quaternion_1"),
    FloatKey::new("rigid_body_quaternion_2"),
    FloatKey::new("rigid_body_quaternion_3"),
];

pub const LOCAL_QUATERNION: [FloatKey; 4] = [
    FloatKey::new("rigid_body_local_quaternion_0"),
    FloatKey::new("rigid_body_local_quaternion_1"),
    FloatKey::new("rigid_body_local_quaternion_2"),
    FloatKey::new("rigid_body_local_quaternion_3"),
];

pub const DIRECTION: [FloatKey; 3] = [
    FloatKey::new("direction_0"),
    FloatKey::new("direction_1"),
    FloatKey::new("direction_2"),
];

pub const NUISANCE: FloatKey = FloatKey::new("nuisance");

/// Maximum number of weights a weight particle can carry.
pub const MAX_WEIGHTS: usize = 20;

pub const WEIGHTS: [FloatKey; MAX_WEIGHTS] = [
    FloatKey::new("weight_0"),
    FloatKey::new("weight_1"),
    FloatKey::new("weight_2"),
    FloatKey::new("weight_3"),
    FloatKey::new("weight_4"),
    FloatKey::new("weight_5"),
    FloatKey::new("weight_6"),
    FloatKey::new("weight_7"),
    FloatKey::new("weight_8"),
    FloatKey::new("weight_9"),
    FloatKey::new("weight_10"),
    FloatKey::new("weight_11"),
    FloatKey::new("weight_12"),
    FloatKey::new("weight_13"),
    FloatKey::new("weight_14"),
    FloatKey::new("weight_15"),
    FloatKey::new("weight_16"),
    FloatKey::new("weight_17"),
    FloatKey::new("weight_18"),
    FloatKey::new("weight_19"),
];
