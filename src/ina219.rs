//! INA219 high-side current/voltage/power monitor.
//!
//! - Bus voltage: 4 mV resolution, 16 V or 32 V full scale
//! - Shunt voltage: 10 µV resolution, ±40 mV to ±320 mV full scale (PGA)
//! - Address (7-bit): 0x40 to 0x4F
//!
//! Current is computed in software from the corrected shunt voltage and a
//! one-point shunt characterization, instead of reading the chip's current
//! register. Offset and shunt corrections therefore apply uniformly without
//! touching the calibration register scaling.

use embedded_hal::i2c::I2c;

const INA219_I2C_ADDR: u8 = 0x40;

/* configuration register fields */
const INA219_RST: u16 = 0x8000;

const INA219_BRNG_MSK: u16 = 0x2000;
const INA219_BRNG_POS: u16 = 13;

const INA219_PG_MSK: u16 = 0x1800;
const INA219_PG_POS: u16 = 11;

const INA219_BADC_MSK: u16 = 0x0780;
const INA219_BADC_POS: u16 = 7;

const INA219_SADC_MSK: u16 = 0x0078;
const INA219_SADC_POS: u16 = 3;

const INA219_MODE_MSK: u16 = 0x0007;
const INA219_MODE_POS: u16 = 0;

const SHUNT_LSB: f32 = 0.000_010; // 10 µV
const BUS_LSB: f32 = 0.004; // 4 mV

macro_rules! set_bits {
    ($reg_data:expr, $mask:expr, $pos:expr, $data:expr) => {
        ($reg_data & !$mask) | (($data << $pos) & $mask)
    };
}

/// INA219 register map. All registers are 16 bit wide, transferred high byte
/// first.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Register {
    Configuration = 0x00,
    /// Raw shunt ADC counts, signed, 10 µV/LSB
    ShuntVoltage = 0x01,
    /// Bits 15-3 voltage counts (4 mV/LSB), bits 2-0 status flags
    BusVoltage = 0x02,
    Power = 0x03,
    Current = 0x04,
    /// Scaling constant for the on-chip current/power computation
    Calibration = 0x05,
}

impl Register {
    #[inline(always)]
    pub fn addr(self) -> u8 {
        self as u8
    }
}

/// ADC resolution/averaging. The INA219 applies one combined setting per
/// channel; this driver programs the same value into the bus and shunt field.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdcMode {
    /// 9 bit, single 84 µs conversion
    Bits9 = 0b0000,
    /// 10 bit, single conversion
    Bits10 = 0b0001,
    /// 11 bit, single conversion
    Bits11 = 0b0010,
    /// 12 bit, single conversion
    Bits12 = 0b0011,
    /// 12 bit, averaged over 2 samples
    Samples2 = 0b1001,
    Samples4 = 0b1010,
    Samples8 = 0b1011,
    Samples16 = 0b1100,
    Samples32 = 0b1101,
    Samples64 = 0b1110,
    /// 12 bit, averaged over 128 samples (68.1 ms conversion time)
    Samples128 = 0b1111,
}

impl AdcMode {
    #[inline(always)]
    fn bits(self) -> u16 {
        self as u16
    }
}

/// Operating mode bits of the configuration register. `init` programs
/// `Continuous`; the driver offers no setter for other modes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MeasureMode {
    PowerDown = 0b000,
    /// Single shunt and bus conversion on each mode write
    Triggered = 0b011,
    AdcOff = 0b100,
    Continuous = 0b111,
}

/// Shunt voltage full-scale range (PGA gain).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Gain {
    /// ±40 mV (gain /1)
    Mv40 = 0b00,
    /// ±80 mV (gain /2)
    Mv80 = 0b01,
    /// ±160 mV (gain /4)
    Mv160 = 0b10,
    /// ±320 mV (gain /8)
    Mv320 = 0b11,
}

impl Gain {
    #[inline(always)]
    fn bits(self) -> u16 {
        self as u16
    }

    /// Calibration register value matching this range. Halving the full scale
    /// doubles the constant.
    fn calibration_value(self) -> u16 {
        match self {
            Gain::Mv40 => 20480,
            Gain::Mv80 => 10240,
            Gain::Mv160 => 8192,
            Gain::Mv320 => 4096,
        }
    }
}

/// Bus voltage full-scale range.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusRange {
    /// 16 V
    V16 = 0,
    /// 32 V
    V32 = 1,
}

/// Shunt ADC zero-current bias: `bits` raw counts observed at a known bus
/// voltage. The bias scales with the common-mode voltage, so one calibration
/// point is enough for a linear correction.
#[derive(Debug, Copy, Clone)]
struct OffsetCalibration {
    bits: u16,
    at_bus_voltage: f32,
}

impl Default for OffsetCalibration {
    fn default() -> Self {
        OffsetCalibration {
            bits: 46,
            at_bus_voltage: 12.5,
        }
    }
}

/// One reference point of the shunt resistor: it drops `voltage` volts at
/// `current` amps.
#[derive(Debug, Copy, Clone)]
struct ShuntCharacteristics {
    voltage: f32,
    current: f32,
}

impl Default for ShuntCharacteristics {
    fn default() -> Self {
        ShuntCharacteristics {
            voltage: 0.075,
            current: 100.0,
        }
    }
}

/// Representation of an INA219.
#[derive(Debug)]
pub struct INA219<I2C> {
    /// concrete I²C device implementation
    i2c: I2C,
    /// I²C device address
    address: u8,
    adc_mode: AdcMode,
    measure_mode: MeasureMode,
    gain: Gain,
    bus_range: BusRange,
    cal_value: u16,
    offset: OffsetCalibration,
    shunt: ShuntCharacteristics,
    shunt_correction: f32,
}

impl<I2C> INA219<I2C>
where
    I2C: I2c,
{
    /// Create a driver instance using the default address `0x40` (A0 and A1
    /// tied to GND). No bus traffic until `init`.
    pub fn new_default(i2c: I2C) -> Self {
        Self::new(i2c, INA219_I2C_ADDR)
    }

    /// Create a driver instance using a custom I²C address.
    pub fn new(i2c: I2C, address: u8) -> Self {
        INA219 {
            i2c,
            address,
            adc_mode: AdcMode::Samples128,
            measure_mode: MeasureMode::Continuous,
            gain: Gain::Mv40,
            bus_range: BusRange::V16,
            cal_value: Gain::Mv40.calibration_value(),
            offset: OffsetCalibration::default(),
            shunt: ShuntCharacteristics::default(),
            shunt_correction: 1.0,
        }
    }

    /// Reset the INA219 and program the default configuration: 128 sample
    /// averaging, continuous conversions, ±40 mV shunt range, 16 V bus range.
    ///
    /// Must complete successfully before any measurement is trusted.
    pub fn init(&mut self) -> Result<(), I2C::Error> {
        self.reset()?;
        self.set_adc_mode(AdcMode::Samples128)?;
        self.set_measure_mode(MeasureMode::Continuous)?;
        self.set_gain(Gain::Mv40)?;
        self.set_bus_range(BusRange::V16)
    }

    /// Soft-reset the device. All registers return to their power-on defaults,
    /// so the configuration must be reprogrammed afterwards.
    pub fn reset(&mut self) -> Result<(), I2C::Error> {
        self.write_register(Register::Configuration, INA219_RST)
    }

    pub fn release(self) -> I2C {
        self.i2c
    }

    /// Set conversion resolution/averaging for both the bus and shunt channel.
    pub fn set_adc_mode(&mut self, mode: AdcMode) -> Result<(), I2C::Error> {
        let data = self.read_register(Register::Configuration)?;
        let data = set_bits!(data, INA219_BADC_MSK, INA219_BADC_POS, mode.bits());
        let data = set_bits!(data, INA219_SADC_MSK, INA219_SADC_POS, mode.bits());
        self.write_register(Register::Configuration, data)?;
        self.adc_mode = mode;
        Ok(())
    }

    fn set_measure_mode(&mut self, mode: MeasureMode) -> Result<(), I2C::Error> {
        let data = self.read_register(Register::Configuration)?;
        let data = set_bits!(data, INA219_MODE_MSK, INA219_MODE_POS, mode as u16);
        self.write_register(Register::Configuration, data)?;
        self.measure_mode = mode;
        Ok(())
    }

    /// Set the shunt voltage full-scale range and rewrite the matching
    /// calibration constant. These are two separate bus transactions; if the
    /// calibration write fails, the device keeps a mismatched gain until the
    /// call is repeated.
    pub fn set_gain(&mut self, gain: Gain) -> Result<(), I2C::Error> {
        let data = self.read_register(Register::Configuration)?;
        let data = set_bits!(data, INA219_PG_MSK, INA219_PG_POS, gain.bits());
        self.write_register(Register::Configuration, data)?;
        self.gain = gain;
        self.cal_value = gain.calibration_value();
        self.write_register(Register::Calibration, self.cal_value)
    }

    /// Set the bus voltage full-scale range.
    pub fn set_bus_range(&mut self, range: BusRange) -> Result<(), I2C::Error> {
        let data = self.read_register(Register::Configuration)?;
        let data = set_bits!(data, INA219_BRNG_MSK, INA219_BRNG_POS, range as u16);
        self.write_register(Register::Configuration, data)?;
        self.bus_range = range;
        Ok(())
    }

    /// Calibrate out the shunt ADC zero-current bias: `bits` raw counts read
    /// at a bus voltage of `at_bus_voltage` volts. No bus traffic; takes
    /// effect on the next measurement.
    pub fn set_offset_correction(&mut self, bits: u16, at_bus_voltage: f32) {
        self.offset = OffsetCalibration {
            bits,
            at_bus_voltage,
        };
    }

    /// Characterize the shunt resistor by one reference point: it drops
    /// `voltage` volts at `current` amps.
    pub fn set_shunt_characteristics(&mut self, voltage: f32, current: f32) {
        self.shunt = ShuntCharacteristics { voltage, current };
    }

    /// Multiplicative correction applied to the measured shunt voltage.
    pub fn set_shunt_correction(&mut self, factor: f32) {
        self.shunt_correction = factor;
    }

    /// Bus voltage in volts. No correction applied.
    pub fn bus_voltage(&mut self) -> Result<f32, I2C::Error> {
        let raw = self.read_register(Register::BusVoltage)?;
        Ok((raw >> 3) as f32 * BUS_LSB)
    }

    /// Zero-current offset in volts at the present bus voltage.
    pub fn offset_correction(&mut self) -> Result<f32, I2C::Error> {
        let bus_voltage = self.bus_voltage()?;
        Ok(-(self.offset.bits as f32 * SHUNT_LSB / self.offset.at_bus_voltage) * bus_voltage)
    }

    /// Shunt voltage in volts, offset-corrected and scaled by the shunt
    /// correction factor. Negative under reverse current.
    pub fn shunt_voltage(&mut self) -> Result<f32, I2C::Error> {
        let raw = self.read_register(Register::ShuntVoltage)? as i16;
        let offset = self.offset_correction()?;
        Ok((raw as f32 * SHUNT_LSB + offset) * self.shunt_correction)
    }

    /// Current in amps, computed from the corrected shunt voltage and the
    /// shunt characteristics.
    pub fn current(&mut self) -> Result<f32, I2C::Error> {
        let shunt_voltage = self.shunt_voltage()?;
        Ok(shunt_voltage / (self.shunt.voltage / self.shunt.current))
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn adc_mode(&self) -> AdcMode {
        self.adc_mode
    }

    pub fn measure_mode(&self) -> MeasureMode {
        self.measure_mode
    }

    pub fn gain(&self) -> Gain {
        self.gain
    }

    pub fn bus_range(&self) -> BusRange {
        self.bus_range
    }

    /// Last value written to the calibration register; always the value
    /// implied by the current gain.
    pub fn calibration_value(&self) -> u16 {
        self.cal_value
    }

    /// Write a 16 bit register, high byte first.
    pub fn write_register(&mut self, register: Register, value: u16) -> Result<(), I2C::Error> {
        let [hi, lo] = value.to_be_bytes();
        self.i2c.write(self.address, &[register.addr(), hi, lo])
    }

    /// Read a 16 bit register, high byte first.
    pub fn read_register(&mut self, register: Register) -> Result<u16, I2C::Error> {
        let mut buf = [0u8; 2];
        self.i2c
            .write_read(self.address, &[register.addr()], &mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }
}
