//! Per-element van der Waals radius and shading color table, indexed by
//! atomic number (§6: "Radii are per-element; the element index is an
//! atomic number in `0..=118`"). `spec.md` names this table as a required
//! input of the Atom Preprocessor without specifying its contents; this is
//! exactly the kind of ambient data a working molecular renderer ships with
//! (published van-der-Waals radii / CPK-style colors), supplemented here
//! per the Open-Questions discipline in `SPEC_FULL.md` §3.1.

/// `(van der Waals radius in nm, CPK-style RGB color)`.
const UNKNOWN_ELEMENT: (f32, [f32; 3]) = (0.20, [1.0, 0.0, 1.0]);

const TABLE: &[(u8, f32, [f32; 3])] = &[
    (1, 0.110, [1.00, 1.00, 1.00]),  // H
    (2, 0.140, [0.85, 1.00, 1.00]),  // He
    (3, 0.182, [0.80, 0.50, 1.00]),  // Li
    (4, 0.153, [0.76, 1.00, 0.00]),  // Be
    (5, 0.192, [1.00, 0.71, 0.71]),  // B
    (6, 0.170, [0.40, 0.40, 0.40]),  // C
    (7, 0.155, [0.19, 0.31, 0.97]),  // N
    (8, 0.152, [1.00, 0.05, 0.05]),  // O
    (9, 0.147, [0.56, 0.88, 0.31]),  // F
    (10, 0.154, [0.70, 0.89, 0.96]), // Ne
    (11, 0.227, [0.67, 0.36, 0.95]), // Na
    (12, 0.173, [0.54, 1.00, 0.00]), // Mg
    (13, 0.184, [0.75, 0.65, 0.65]), // Al
    (14, 0.210, [0.94, 0.78, 0.63]), // Si
    (15, 0.180, [1.00, 0.50, 0.00]), // P
    (16, 0.180, [1.00, 1.00, 0.19]), // S
    (17, 0.175, [0.12, 0.94, 0.12]), // Cl
    (18, 0.188, [0.50, 0.82, 0.89]), // Ar
    (19, 0.275, [0.56, 0.25, 0.83]), // K
    (20, 0.231, [0.24, 1.00, 0.00]), // Ca
    (26, 0.194, [0.88, 0.40, 0.20]), // Fe
    (29, 0.140, [0.78, 0.50, 0.20]), // Cu
    (30, 0.139, [0.49, 0.50, 0.69]), // Zn
    (35, 0.183, [0.65, 0.16, 0.16]), // Br
    (53, 0.198, [0.58, 0.00, 0.58]), // I
    (79, 0.166, [1.00, 0.82, 0.14]), // Au
];

/// Van der Waals radius, in nm, substituted for an atom's radius field by
/// the preprocessor's conversion kernel (§4.A).
pub fn radius_nm(atomic_number: u8) -> f32 {
    TABLE
        .iter()
        .find(|(z, _, _)| *z == atomic_number)
        .map_or(UNKNOWN_ELEMENT.0, |(_, r, _)| *r)
}

/// Cosmetic shading color consumed by the pixel shader (§4.D).
pub fn color(atomic_number: u8) -> [f32; 3] {
    TABLE
        .iter()
        .find(|(z, _, _)| *z == atomic_number)
        .map_or(UNKNOWN_ELEMENT.1, |(_, _, c)| *c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_elements_have_plausible_radii() {
        assert!((radius_nm(1) - 0.110).abs() < 1e-6);
        assert!((radius_nm(6) - 0.170).abs() < 1e-6);
    }

    #[test]
    fn unknown_elements_fall_back_to_a_default() {
        assert_eq!(radius_nm(118), UNKNOWN_ELEMENT.0);
        assert_eq!(color(0), UNKNOWN_ELEMENT.1);
    }
}
