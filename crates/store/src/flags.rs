//! Packed per-voxel flag word.
//!
//! ```text
//! bits  0..=7   gradient x (i8, q/127)
//! bits  8..=15  gradient y
//! bits 16..=23  gradient z
//! bits 24..=26  facing direction
//! bit  27       can-stack
//! bits 28..=29  matter state - 1
//! ```
//!
//! Every setter masks its own range; the other ranges are left untouched.

use serde::{Deserialize, Serialize};
use terrarium_common::{Direction, GradientVector, MatterState};

const GRADIENT_SHIFT: u32 = 0;
const GRADIENT_MASK: u32 = 0x00FF_FFFF;
const DIRECTION_SHIFT: u32 = 24;
const DIRECTION_MASK: u32 = 0b111;
const CANSTACK_SHIFT: u32 = 27;
const CANSTACK_MASK: u32 = 0b1;
const MATTERSTATE_SHIFT: u32 = 28;
const MATTERSTATE_MASK: u32 = 0b11;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PackedFlags(pub u32);

impl PackedFlags {
    pub const EMPTY: Self = Self(0);

    pub fn bits(self) -> u32 {
        self.0
    }

    fn get_bits(self, shift: u32, mask: u32) -> u32 {
        (self.0 >> shift) & mask
    }

    fn with_bits(self, shift: u32, mask: u32, value: u32) -> Self {
        Self((self.0 & !(mask << shift)) | ((value & mask) << shift))
    }

    pub fn direction(self) -> Direction {
        Direction::from_raw(self.get_bits(DIRECTION_SHIFT, DIRECTION_MASK) as i32)
    }

    pub fn with_direction(self, direction: Direction) -> Self {
        self.with_bits(DIRECTION_SHIFT, DIRECTION_MASK, direction.as_raw() as u32)
    }

    pub fn can_stack(self) -> bool {
        self.get_bits(CANSTACK_SHIFT, CANSTACK_MASK) == 1
    }

    pub fn with_can_stack(self, can_stack: bool) -> Self {
        self.with_bits(CANSTACK_SHIFT, CANSTACK_MASK, can_stack as u32)
    }

    pub fn matter_state(self) -> MatterState {
        MatterState::from_raw(self.get_bits(MATTERSTATE_SHIFT, MATTERSTATE_MASK) as i32 + 1)
    }

    pub fn with_matter_state(self, state: MatterState) -> Self {
        let raw = (state.as_raw() - 1).clamp(0, 3) as u32;
        self.with_bits(MATTERSTATE_SHIFT, MATTERSTATE_MASK, raw)
    }

    pub fn gradient(self) -> GradientVector {
        let g = self.get_bits(GRADIENT_SHIFT, GRADIENT_MASK);
        GradientVector::new(
            dequantize((g & 0xFF) as u8 as i8),
            dequantize(((g >> 8) & 0xFF) as u8 as i8),
            dequantize(((g >> 16) & 0xFF) as u8 as i8),
        )
    }

    pub fn with_gradient(self, gradient: GradientVector) -> Self {
        let packed = quantize(gradient.x) as u8 as u32
            | ((quantize(gradient.y) as u8 as u32) << 8)
            | ((quantize(gradient.z) as u8 as u32) << 16);
        self.with_bits(GRADIENT_SHIFT, GRADIENT_MASK, packed)
    }
}

/// Clamp to `[-1, 1]` and scale to a signed byte. NaN quantizes to 0.
pub fn quantize(v: f32) -> i8 {
    if v.is_nan() {
        return 0;
    }
    (v.clamp(-1.0, 1.0) * 127.0).round() as i8
}

pub fn dequantize(q: i8) -> f32 {
    q as f32 / 127.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_word_decodes_defaults() {
        let f = PackedFlags::EMPTY;
        assert_eq!(f.direction(), Direction::Up);
        assert!(!f.can_stack());
        assert_eq!(f.matter_state(), MatterState::Solid);
        assert_eq!(f.gradient(), GradientVector::default());
    }

    #[test]
    fn fields_do_not_clobber_each_other() {
        let f = PackedFlags::EMPTY
            .with_gradient(GradientVector::new(1.0, -1.0, 0.5))
            .with_direction(Direction::Downward)
            .with_can_stack(true)
            .with_matter_state(MatterState::Plasma);

        let g = f.gradient();
        assert_eq!(g.x, 1.0);
        assert_eq!(g.y, -1.0);
        assert!((g.z - 0.5).abs() <= 1.0 / 127.0);
        assert_eq!(f.direction(), Direction::Downward);
        assert!(f.can_stack());
        assert_eq!(f.matter_state(), MatterState::Plasma);

        let f2 = f.with_direction(Direction::Left);
        assert_eq!(f2.direction(), Direction::Left);
        assert_eq!(f2.gradient(), g);
        assert!(f2.can_stack());
        assert_eq!(f2.matter_state(), MatterState::Plasma);

        let f3 = f2.with_gradient(GradientVector::default());
        assert_eq!(f3.direction(), Direction::Left);
        assert_eq!(f3.bits() & GRADIENT_MASK, 0);
    }

    #[test]
    fn gradient_is_clamped() {
        let f = PackedFlags::EMPTY.with_gradient(GradientVector::new(4.0, -9.0, f32::NAN));
        let g = f.gradient();
        assert_eq!(g.x, 1.0);
        assert_eq!(g.y, -1.0);
        assert_eq!(g.z, 0.0);
    }

    #[test]
    fn bit_positions_match_layout() {
        let f = PackedFlags::EMPTY.with_direction(Direction::Right);
        assert_eq!(f.bits(), 2 << 24);
        let f = PackedFlags::EMPTY.with_can_stack(true);
        assert_eq!(f.bits(), 1 << 27);
        let f = PackedFlags::EMPTY.with_matter_state(MatterState::Gas);
        assert_eq!(f.bits(), 2 << 28);
        let f = PackedFlags::EMPTY.with_gradient(GradientVector::new(0.0, 0.0, -1.0));
        assert_eq!(f.bits(), 0x81 << 16);
    }

    #[test]
    fn quantization_error_is_bounded() {
        for i in -100..=100 {
            let v = i as f32 / 100.0;
            assert!((dequantize(quantize(v)) - v).abs() <= 0.5 / 127.0 + 1e-6);
        }
    }
}
