// Copyright 2025-2026 CEMAXECUTER LLC

use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_uchar, c_void};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::channel::Sender;

use crate::{GainMode, SampleBuf, SdrError, SdrSource};

/// R820T/R828D tuners cover roughly 24 MHz .. 1.766 GHz.
const TUNER_FREQ_MIN: f64 = 24_000_000.0;
const TUNER_FREQ_MAX: f64 = 1_766_000_000.0;

/// 15 transfers of 16 KiB keeps ~60 ms in flight at 2.048 MSPS.
const ASYNC_BUF_NUM: u32 = 15;
const ASYNC_BUF_LEN: u32 = 16384 * 4;

type RtlsdrDev = c_void;

extern "C" {
    fn rtlsdr_get_device_count() -> u32;
    fn rtlsdr_get_device_name(index: u32) -> *const c_char;
    fn rtlsdr_get_device_usb_strings(
        index: u32,
        manufact: *mut c_char,
        product: *mut c_char,
        serial: *mut c_char,
    ) -> c_int;
    fn rtlsdr_open(dev: *mut *mut RtlsdrDev, index: u32) -> c_int;
    fn rtlsdr_close(dev: *mut RtlsdrDev) -> c_int;
    fn rtlsdr_set_sample_rate(dev: *mut RtlsdrDev, rate: u32) -> c_int;
    fn rtlsdr_set_center_freq(dev: *mut RtlsdrDev, freq: u32) -> c_int;
    fn rtlsdr_set_freq_correction(dev: *mut RtlsdrDev, ppm: c_int) -> c_int;
    fn rtlsdr_set_tuner_gain_mode(dev: *mut RtlsdrDev, manual: c_int) -> c_int;
    fn rtlsdr_set_tuner_gain(dev: *mut RtlsdrDev, gain: c_int) -> c_int;
    fn rtlsdr_reset_buffer(dev: *mut RtlsdrDev) -> c_int;
    fn rtlsdr_read_async(
        dev: *mut RtlsdrDev,
        cb: unsafe extern "C" fn(*mut c_uchar, u32, *mut c_void),
        ctx: *mut c_void,
        buf_num: u32,
        buf_len: u32,
    ) -> c_int;
    fn rtlsdr_cancel_async(dev: *mut RtlsdrDev) -> c_int;
}

/// Information about a detected RTL-SDR device
#[derive(Debug, Clone)]
pub struct RtlSdrInfo {
    pub index: u32,
    pub name: String,
    pub serial: String,
}

/// List all available RTL-SDR devices
pub fn list_devices() -> Vec<RtlSdrInfo> {
    let mut devices = Vec::new();
    unsafe {
        let count = rtlsdr_get_device_count();
        for index in 0..count {
            let name_ptr = rtlsdr_get_device_name(index);
            let name = if name_ptr.is_null() {
                String::new()
            } else {
                CStr::from_ptr(name_ptr).to_string_lossy().to_string()
            };

            let mut manufact = [0 as c_char; 256];
            let mut product = [0 as c_char; 256];
            let mut serial = [0 as c_char; 256];
            let serial = if rtlsdr_get_device_usb_strings(
                index,
                manufact.as_mut_ptr(),
                product.as_mut_ptr(),
                serial.as_mut_ptr(),
            ) == 0
            {
                CStr::from_ptr(serial.as_ptr()).to_string_lossy().to_string()
            } else {
                String::new()
            };

            devices.push(RtlSdrInfo { index, name, serial });
        }
    }
    devices
}

/// Context passed to the async read callback
struct RxContext {
    tx: Sender<SampleBuf>,
    dropped: Arc<AtomicU64>,
}

unsafe extern "C" fn rx_callback(buf: *mut c_uchar, len: u32, ctx: *mut c_void) {
    let ctx = &*(ctx as *const RxContext);
    let len = len as usize;
    let data = std::slice::from_raw_parts(buf, len).to_vec();
    let num_samples = len / 2;

    // Never block inside the USB callback: a full queue means the decode
    // worker fell behind, so the block is dropped and counted.
    if ctx.tx.try_send(SampleBuf { data, num_samples }).is_err() {
        ctx.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

/// RTL-SDR source using the librtlsdr C API
pub struct RtlSdrSource {
    dev: *mut RtlsdrDev,
    device_index: u32,
    sample_rate: u32,
    center_freq: f64,
    running: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

// The librtlsdr device handle is confined to this struct; all calls on it
// go through &mut self or the single async reader.
unsafe impl Send for RtlSdrSource {}

impl RtlSdrSource {
    /// Open a device by index and program sample rate, PPM correction, and
    /// gain. Fails with a typed error before any streaming starts.
    pub fn open(
        device_index: u32,
        sample_rate: u32,
        ppm_correction: i32,
        gain: GainMode,
    ) -> Result<Self, SdrError> {
        unsafe {
            let count = rtlsdr_get_device_count();
            if count == 0 || device_index >= count {
                return Err(SdrError::DeviceMissing(device_index));
            }

            let mut dev: *mut RtlsdrDev = ptr::null_mut();
            let r = rtlsdr_open(&mut dev, device_index);
            if r != 0 || dev.is_null() {
                return Err(SdrError::Open(format!("rtlsdr_open failed: {}", r)));
            }

            if rtlsdr_set_sample_rate(dev, sample_rate) != 0 {
                rtlsdr_close(dev);
                return Err(SdrError::Open(format!(
                    "unsupported sample rate {}",
                    sample_rate
                )));
            }

            // librtlsdr rejects ppm == 0 with -2; that just means "already there"
            if ppm_correction != 0 && rtlsdr_set_freq_correction(dev, ppm_correction) < 0 {
                rtlsdr_close(dev);
                return Err(SdrError::Open(format!(
                    "failed to set ppm correction {}",
                    ppm_correction
                )));
            }

            match gain {
                GainMode::Auto => {
                    if rtlsdr_set_tuner_gain_mode(dev, 0) != 0 {
                        rtlsdr_close(dev);
                        return Err(SdrError::GainUnsupported("auto".into()));
                    }
                }
                GainMode::Manual(db) => {
                    if rtlsdr_set_tuner_gain_mode(dev, 1) != 0
                        || rtlsdr_set_tuner_gain(dev, (db * 10.0) as c_int) != 0
                    {
                        rtlsdr_close(dev);
                        return Err(SdrError::GainUnsupported(format!("{} dB", db)));
                    }
                }
            }

            Ok(Self {
                dev,
                device_index,
                sample_rate,
                center_freq: 0.0,
                running: Arc::new(AtomicBool::new(false)),
                dropped: Arc::new(AtomicU64::new(0)),
            })
        }
    }
}

impl SdrSource for RtlSdrSource {
    fn start(&mut self, tx: Sender<SampleBuf>) -> Result<(), SdrError> {
        if self.center_freq == 0.0 {
            return Err(SdrError::Open("start before tune".into()));
        }

        self.running.store(true, Ordering::SeqCst);

        let ctx = Box::new(RxContext {
            tx,
            dropped: Arc::clone(&self.dropped),
        });
        let ctx_ptr = Box::into_raw(ctx);

        log::info!(
            "rtl-sdr[{}]: streaming at {} Hz, {:.4} MHz",
            self.device_index,
            self.sample_rate,
            self.center_freq / 1e6
        );

        // Blocks until rtlsdr_cancel_async or a USB error.
        let r = unsafe {
            rtlsdr_reset_buffer(self.dev);
            rtlsdr_read_async(
                self.dev,
                rx_callback,
                ctx_ptr as *mut c_void,
                ASYNC_BUF_NUM,
                ASYNC_BUF_LEN,
            )
        };

        // Reclaim the context now that no callback can fire.
        drop(unsafe { Box::from_raw(ctx_ptr) });

        // If stop() was requested, running is already false and the nonzero
        // return from the cancelled read is expected.
        let was_running = self.running.swap(false, Ordering::SeqCst);
        if r != 0 && was_running {
            return Err(SdrError::Open(format!("rtlsdr_read_async failed: {}", r)));
        }
        Ok(())
    }

    fn stop(&mut self) {
        if self.running.swap(false, Ordering::SeqCst) {
            unsafe {
                rtlsdr_cancel_async(self.dev);
            }
        }
    }

    fn tune(&mut self, frequency_hz: f64) -> Result<(), SdrError> {
        if !(TUNER_FREQ_MIN..=TUNER_FREQ_MAX).contains(&frequency_hz) {
            return Err(SdrError::TuneOutOfRange(frequency_hz));
        }
        let r = unsafe { rtlsdr_set_center_freq(self.dev, frequency_hz as u32) };
        if r != 0 {
            // Device keeps the previous frequency
            return Err(SdrError::TuneOutOfRange(frequency_hz));
        }
        self.center_freq = frequency_hz;
        log::debug!("rtl-sdr[{}]: tuned to {:.4} MHz", self.device_index, frequency_hz / 1e6);
        Ok(())
    }

    fn dropped_blocks(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn drop_counter(&self) -> Option<Arc<AtomicU64>> {
        Some(Arc::clone(&self.dropped))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn center_frequency(&self) -> f64 {
        self.center_freq
    }
}

impl Drop for RtlSdrSource {
    fn drop(&mut self) {
        self.stop();
        if !self.dev.is_null() {
            unsafe {
                rtlsdr_close(self.dev);
            }
            self.dev = ptr::null_mut();
        }
    }
}
