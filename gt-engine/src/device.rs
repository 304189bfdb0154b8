use std::io;

use gt_registers::map::{ControlBits, RegisterMap, StatusLayout};

use crate::{RegisterAccess, error::EngineError};

/// A register backend bound to the register map of its core.
#[derive(Debug)]
pub struct ComputeUnit<R> {
    regs: R,
    map: &'static RegisterMap,
    gt_index: u32,
}

impl<R: RegisterAccess> ComputeUnit<R> {
    pub fn new(regs: R, map: &'static RegisterMap, gt_index: u32) -> ComputeUnit<R> {
        ComputeUnit {
            regs,
            map,
            gt_index,
        }
    }

    pub fn map(&self) -> &'static RegisterMap {
        self.map
    }

    pub fn gt_index(&self) -> u32 {
        self.gt_index
    }

    pub fn regs(&self) -> &R {
        &self.regs
    }

    pub fn read(&self, addr: u16) -> io::Result<u32> {
        let value = self.regs.read(addr)?;
        log::trace!("GT {}: read  0x{:02x} = 0x{:08x}", self.gt_index, addr, value);
        Ok(value)
    }

    pub fn write(&self, addr: u16, value: u32) -> io::Result<()> {
        log::trace!("GT {}: write 0x{:02x} = 0x{:08x}", self.gt_index, addr, value);
        self.regs.write(addr, value)
    }

    pub fn read_burst(&self, addr: u16, buf: &mut [u32]) -> io::Result<()> {
        self.regs.read_burst(addr, buf)?;
        log::trace!("GT {}: burst 0x{:02x} = {:08x?}", self.gt_index, addr, buf);
        Ok(())
    }

    pub fn control(&self) -> Result<&'static ControlBits, EngineError> {
        self.map
            .control
            .as_ref()
            .ok_or(EngineError::Unsupported("control register"))
    }

    pub fn status_layout(&self) -> Option<&'static StatusLayout> {
        self.map.status.as_ref()
    }

    pub fn write_ctrl(&self, value: u32) -> io::Result<()> {
        self.write(self.map.ctrl, value)
    }

    pub fn set_ctrl_bits(&self, bits: u32) -> io::Result<()> {
        let ctrl = self.read(self.map.ctrl)?;
        self.write(self.map.ctrl, ctrl | bits)
    }

    pub fn clear_ctrl_bits(&self, bits: u32) -> io::Result<()> {
        let ctrl = self.read(self.map.ctrl)?;
        self.write(self.map.ctrl, ctrl & !bits)
    }

    /// Issue the hardware clear of sticky status bits and counters.
    pub fn clear_status(&self) -> Result<(), EngineError> {
        if let Some(control) = self.map.control {
            log::debug!("GT {}: clear status", self.gt_index);
            self.set_ctrl_bits(control.clear_status)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::{collections::HashMap, sync::Mutex};

    use super::*;

    /// Register file that records every write.
    #[derive(Default)]
    pub(crate) struct RegisterFile {
        pub values: Mutex<HashMap<u16, u32>>,
        pub writes: Mutex<Vec<(u16, u32)>>,
    }

    impl RegisterFile {
        pub fn set(&self, addr: u16, value: u32) {
            self.values.lock().unwrap().insert(addr, value);
        }

        pub fn get(&self, addr: u16) -> u32 {
            self.values.lock().unwrap().get(&addr).copied().unwrap_or(0)
        }

        pub fn writes_to(&self, addr: u16) -> Vec<u32> {
            self.writes
                .lock()
                .unwrap()
                .iter()
                .filter(|(a, _)| *a == addr)
                .map(|(_, v)| *v)
                .collect()
        }
    }

    impl RegisterAccess for RegisterFile {
        fn read(&self, addr: u16) -> io::Result<u32> {
            Ok(self.get(addr))
        }

        fn write(&self, addr: u16, value: u32) -> io::Result<()> {
            self.writes.lock().unwrap().push((addr, value));
            self.set(addr, value);
            Ok(())
        }
    }

    #[test]
    fn read_modify_write_keeps_other_bits() {
        let cu = ComputeUnit::new(RegisterFile::default(), &gt_registers::map::MULTI_GT, 0);
        cu.regs().set(0x40, 0x30);
        cu.set_ctrl_bits(1 << 8).unwrap();
        assert_eq!(cu.regs().get(0x40), 0x130);
        cu.clear_ctrl_bits(0x10).unwrap();
        assert_eq!(cu.regs().get(0x40), 0x120);
    }

    #[test]
    fn loopback_core_has_no_status() {
        let cu = ComputeUnit::new(RegisterFile::default(), &gt_registers::map::GT_LPBK, 0);
        assert!(cu.status_layout().is_none());
        assert!(cu.control().is_err());
        cu.clear_status().unwrap();
        assert!(cu.regs().writes.lock().unwrap().is_empty());
    }
}
