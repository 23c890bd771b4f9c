//! Stand-in `radiacode` package for driving the bridge helper in tests.
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

const COMMON: &str = r#"
import datetime
import time
from radiacode.transports.usb import DeviceNotFound

NOW = datetime.datetime(2024, 5, 2, 10, 15, 1)


class RealTimeData:
    def __init__(self, dt, dose_rate, count_rate, dose_rate_err):
        self.dt = dt
        self.dose_rate = dose_rate
        self.count_rate = count_rate
        self.dose_rate_err = dose_rate_err


class RareData:
    def __init__(self, dt, temperature):
        self.dt = dt
        self.dose = 0.0
        self.temperature = temperature


class Spectrum:
    def __init__(self, counts):
        self.duration = datetime.timedelta(seconds=600)
        self.a0 = -6.2
        self.a1 = 2.44
        self.a2 = 0.0004
        self.counts = counts


class BaseRadiaCode:
    def __init__(self, bluetooth_mac=None, serial_number=None):
        pass

    def data_buf(self):
        return [
            RareData(NOW - datetime.timedelta(seconds=1), 23.5),
            RealTimeData(NOW, 1.2e-5, 5.5, 14.0),
        ]

    def configuration(self):
        return "Foo=1\nSerialNumber=RC-102-000123\nBar=2"

    def spectrum(self):
        return Spectrum([0, 3, 7, 1])
"#;

/// A device that answers everything immediately.
pub const HEALTHY: &str = "RadiaCode = BaseRadiaCode\n";

/// Opening fails with the SDK's USB `DeviceNotFound`.
pub const ABSENT: &str = r#"
class RadiaCode(BaseRadiaCode):
    def __init__(self, bluetooth_mac=None, serial_number=None):
        raise DeviceNotFound("no RadiaCode on USB")
"#;

/// Opening never finishes in a test's lifetime.
pub const HANGING_OPEN: &str = r#"
class RadiaCode(BaseRadiaCode):
    def __init__(self, bluetooth_mac=None, serial_number=None):
        time.sleep(30)
"#;

/// The first buffer read takes 1.5 s; the buffer is drained afterwards.
pub const SLOW_DRAINING_BUFFER: &str = r#"
class RadiaCode(BaseRadiaCode):
    calls = 0

    def data_buf(self):
        RadiaCode.calls += 1
        if RadiaCode.calls == 1:
            time.sleep(1.5)
            return BaseRadiaCode.data_buf(self)
        return []
"#;

pub struct FakeSdk {
    dir: TempDir,
}

impl FakeSdk {
    pub fn new(device: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let package = dir.path().join("radiacode");
        fs::create_dir_all(package.join("transports")).unwrap();
        fs::write(package.join("__init__.py"), format!("{}\n{}", COMMON, device)).unwrap();
        fs::write(package.join("transports").join("__init__.py"), "").unwrap();
        fs::write(
            package.join("transports").join("usb.py"),
            "class DeviceNotFound(Exception):\n    pass\n",
        )
        .unwrap();
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

pub fn python_available() -> bool {
    let found = Command::new("python3")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false);
    if !found {
        eprintln!("python3 not found, skipping bridge helper test");
    }
    found
}
