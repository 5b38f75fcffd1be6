/// Signed shortest rotation from `angle2` to `angle1`, in degrees.
///
/// Adding the result to `angle2` lands on `angle1` along the shorter arc.
/// Inputs need not be normalized. The result lies in (-180, 180]: equal angles
/// give `0.0` and an exact half-turn gives `+180.0` whichever way round the
/// arguments are.
pub fn signed_angle_difference(angle1: f64, angle2: f64) -> f64 {
    let a1 = angle1.rem_euclid(360.0);
    let a2 = angle2.rem_euclid(360.0);

    let diff = a1 - a2;
    if diff > 180.0 {
        diff - 360.0
    } else if diff <= -180.0 {
        diff + 360.0
    } else {
        diff
    }
}
