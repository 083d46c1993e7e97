//! Bit-field extraction from fixed-layout HID input reports.
//!
//! A [`ReportItem`] says where one field lives inside a raw report
//! buffer: which byte, which bit, how wide, and whether it is signed.
//! Extraction is a pure function over a byte slice; there is no pointer
//! arithmetic and no state. A fixed, ordered set of items forms the
//! decode table for one report type.
//!
//! The one table defined here is the 8-byte joystick layout decoded by
//! [`JoystickDecoder`].

/// Where one field lives inside a raw report buffer.
///
/// The fields of this crate's tables are all single-byte or sub-byte:
/// `bit_shift + bit_size` never exceeds 8. The logical/physical ranges
/// and resolution describe the field the way a HID report descriptor
/// would; extraction itself only uses the location and signedness.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReportItem {
    pub byte_offset: usize,
    pub bit_shift: u8,
    pub bit_size: u8,
    pub signed: bool,
    pub logical_min: i32,
    pub logical_max: i32,
    pub physical_min: i32,
    pub physical_max: i32,
    pub resolution: u32,
}

impl ReportItem {
    /// Unsigned field spanning the full logical range of its width.
    pub const fn unsigned(byte_offset: usize, bit_shift: u8, bit_size: u8) -> Self {
        assert!(bit_size >= 1 && bit_shift + bit_size <= 8);
        let max = (1 << bit_size) - 1;
        ReportItem {
            byte_offset,
            bit_shift,
            bit_size,
            signed: false,
            logical_min: 0,
            logical_max: max,
            physical_min: 0,
            physical_max: max,
            resolution: 1,
        }
    }

    /// Two's-complement field spanning the full logical range of its
    /// width.
    pub const fn signed(byte_offset: usize, bit_shift: u8, bit_size: u8) -> Self {
        assert!(bit_size >= 1 && bit_shift + bit_size <= 8);
        let min = -(1 << (bit_size - 1));
        let max = (1 << (bit_size - 1)) - 1;
        ReportItem {
            byte_offset,
            bit_shift,
            bit_size,
            signed: true,
            logical_min: min,
            logical_max: max,
            physical_min: min,
            physical_max: max,
            resolution: 1,
        }
    }

    /// Extract the raw field value from `report`.
    ///
    /// `index` selects an instance for array-typed items (the field is
    /// read `index * bit_size` bits past its base location); every
    /// descriptor in this crate is a single-instance item, so callers
    /// pass 0. A location past the end of `report` reads as zero, as
    /// does a zero-width item.
    pub fn read(&self, report: &[u8], index: usize) -> i32 {
        if self.bit_size == 0 {
            return 0;
        }
        let bit = self.byte_offset * 8 + self.bit_shift as usize + index * self.bit_size as usize;
        let byte = match report.get(bit / 8) {
            Some(byte) => *byte,
            None => return 0,
        };
        let mask = if self.bit_size >= 8 {
            0xff
        } else {
            (1 << self.bit_size) - 1
        };
        let raw = ((byte >> (bit % 8)) & mask) as i32;
        if self.signed && raw >= 1 << (self.bit_size - 1) {
            raw - (1 << self.bit_size)
        } else {
            raw
        }
    }
}

/// Raw joystick input reports are exactly this long.
pub const JOYSTICK_REPORT_LEN: usize = 8;

/// The joystick decode table. Byte 0 is reserved in this layout.
mod items {
    use super::ReportItem;

    pub const LEFT_X: ReportItem = ReportItem::unsigned(1, 0, 8);
    pub const LEFT_Y: ReportItem = ReportItem::unsigned(2, 0, 8);
    pub const RIGHT_X: ReportItem = ReportItem::unsigned(3, 0, 8);
    pub const RIGHT_Y: ReportItem = ReportItem::unsigned(4, 0, 8);

    pub const PAD_ARROW: ReportItem = ReportItem::unsigned(5, 0, 4);
    pub const HAT_LEFT: ReportItem = ReportItem::unsigned(5, 4, 1);
    pub const HAT_RIGHT: ReportItem = ReportItem::unsigned(5, 5, 1);

    pub const PAD_A: ReportItem = ReportItem::unsigned(6, 0, 1);
    pub const PAD_B: ReportItem = ReportItem::unsigned(6, 1, 1);
    pub const PAD_X: ReportItem = ReportItem::unsigned(6, 2, 1);
    pub const PAD_Y: ReportItem = ReportItem::unsigned(6, 3, 1);
    pub const SHOULDER_L: ReportItem = ReportItem::unsigned(6, 4, 1);
    pub const SHOULDER_R: ReportItem = ReportItem::unsigned(6, 5, 1);
    pub const TRIGGER_L: ReportItem = ReportItem::unsigned(6, 6, 1);
    pub const TRIGGER_R: ReportItem = ReportItem::unsigned(6, 7, 1);

    pub const SELECT: ReportItem = ReportItem::unsigned(7, 0, 1);
    pub const START: ReportItem = ReportItem::unsigned(7, 1, 1);
}

/// Decoded joystick state: axis magnitudes, the 4-bit direction pad
/// value, and press booleans for everything else.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JoystickReport {
    pub left_x: u8,
    pub left_y: u8,
    pub right_x: u8,
    pub right_y: u8,
    pub pad_arrow: u8,
    pub hat_left: bool,
    pub hat_right: bool,
    pub pad_a: bool,
    pub pad_b: bool,
    pub pad_x: bool,
    pub pad_y: bool,
    pub shoulder_l: bool,
    pub shoulder_r: bool,
    pub trigger_l: bool,
    pub trigger_r: bool,
    pub select: bool,
    pub start: bool,
}

impl JoystickReport {
    pub const ZERO: Self = JoystickReport {
        left_x: 0,
        left_y: 0,
        right_x: 0,
        right_y: 0,
        pad_arrow: 0,
        hat_left: false,
        hat_right: false,
        pad_a: false,
        pad_b: false,
        pad_x: false,
        pad_y: false,
        shoulder_l: false,
        shoulder_r: false,
        trigger_l: false,
        trigger_r: false,
        select: false,
        start: false,
    };
}

/// Decode failures. The previous decoded record survives every failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Zero-length or wrong-length raw report.
    BadLength,
}

/// Decoder for the fixed joystick report layout.
///
/// Holds the most recently decoded record and the raw bytes of the two
/// most recent reports, so a caller can ask whether anything changed.
pub struct JoystickDecoder {
    raw: [u8; JOYSTICK_REPORT_LEN],
    previous: [u8; JOYSTICK_REPORT_LEN],
    info: JoystickReport,
}

impl JoystickDecoder {
    pub const fn new() -> Self {
        JoystickDecoder {
            raw: [0; JOYSTICK_REPORT_LEN],
            previous: [0; JOYSTICK_REPORT_LEN],
            info: JoystickReport::ZERO,
        }
    }

    /// Decode one raw report.
    ///
    /// The length must be exactly [`JOYSTICK_REPORT_LEN`]; anything
    /// else (including zero, a torn transfer) fails without touching
    /// the previous decoded record. The bytes are copied into a stable
    /// buffer before extraction, since `report` may alias a
    /// hardware-owned transfer buffer.
    pub fn decode(&mut self, report: &[u8]) -> Result<&JoystickReport, DecodeError> {
        if report.len() != JOYSTICK_REPORT_LEN {
            return Err(DecodeError::BadLength);
        }
        self.previous = self.raw;
        self.raw.copy_from_slice(report);

        let raw = &self.raw[..];
        self.info = JoystickReport {
            left_x: items::LEFT_X.read(raw, 0) as u8,
            left_y: items::LEFT_Y.read(raw, 0) as u8,
            right_x: items::RIGHT_X.read(raw, 0) as u8,
            right_y: items::RIGHT_Y.read(raw, 0) as u8,
            pad_arrow: items::PAD_ARROW.read(raw, 0) as u8,
            hat_left: items::HAT_LEFT.read(raw, 0) != 0,
            hat_right: items::HAT_RIGHT.read(raw, 0) != 0,
            pad_a: items::PAD_A.read(raw, 0) != 0,
            pad_b: items::PAD_B.read(raw, 0) != 0,
            pad_x: items::PAD_X.read(raw, 0) != 0,
            pad_y: items::PAD_Y.read(raw, 0) != 0,
            shoulder_l: items::SHOULDER_L.read(raw, 0) != 0,
            shoulder_r: items::SHOULDER_R.read(raw, 0) != 0,
            trigger_l: items::TRIGGER_L.read(raw, 0) != 0,
            trigger_r: items::TRIGGER_R.read(raw, 0) != 0,
            select: items::SELECT.read(raw, 0) != 0,
            start: items::START.read(raw, 0) != 0,
        };
        Ok(&self.info)
    }

    /// Most recently decoded record.
    pub fn info(&self) -> &JoystickReport {
        &self.info
    }

    /// The raw bytes differed between the two most recent successful
    /// decodes.
    pub fn changed(&self) -> bool {
        self.raw != self.previous
    }
}

impl Default for JoystickDecoder {
    fn default() -> Self {
        Self::new()
    }
}
