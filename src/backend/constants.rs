#![allow(dead_code)]

//
// Status codes (VSCAN_STATUS)
//
pub const VSCAN_ERR_OK: i32 = 0;
pub const VSCAN_ERR_ERR: i32 = -1;
pub const VSCAN_ERR_NO_DEVICE_FOUND: i32 = -2;
pub const VSCAN_ERR_SUBAPI: i32 = -3;
pub const VSCAN_ERR_NOT_ENOUGH_MEMORY: i32 = -4;
pub const VSCAN_ERR_NO_ELEMENT_FOUND: i32 = -5;
pub const VSCAN_ERR_INVALID_HANDLE: i32 = -6;
pub const VSCAN_ERR_IOCTL: i32 = -7;
pub const VSCAN_ERR_MUTEX: i32 = -8;
pub const VSCAN_ERR_CMD: i32 = -9;
pub const VSCAN_ERR_LISTEN_ONLY: i32 = -10;
pub const VSCAN_ERR_NOT_SUPPORTED: i32 = -11;
pub const VSCAN_ERR_GOTO_ERROR: i32 = -101;

pub const VSCAN_ERROR_STRING_LEN: usize = 64;

//
// VSCAN_Open modes
//
pub const VSCAN_MODE_NORMAL: u32 = 0;
pub const VSCAN_MODE_LISTEN_ONLY: u32 = 1;
pub const VSCAN_MODE_SELF_RECEPTION: u32 = 2;

//
// VSCAN_Ioctl requests
//
pub const VSCAN_IOCTL_SET_DEBUG: u32 = 1;
pub const VSCAN_IOCTL_GET_HWPARAM: u32 = 2;
pub const VSCAN_IOCTL_SET_SPEED: u32 = 3;
pub const VSCAN_IOCTL_SET_BTR: u32 = 4;
pub const VSCAN_IOCTL_GET_FLAGS: u32 = 5;
pub const VSCAN_IOCTL_SET_ACC_CODE_MASK: u32 = 6;
pub const VSCAN_IOCTL_SET_TIMESTAMP: u32 = 7;
pub const VSCAN_IOCTL_SET_DEBUG_MODE: u32 = 8;
pub const VSCAN_IOCTL_SET_BLOCKING_READ: u32 = 9;
pub const VSCAN_IOCTL_SET_FILTER_MODE: u32 = 10;
pub const VSCAN_IOCTL_GET_API_VERSION: u32 = 11;

pub const VSCAN_IOCTL_OFF: u32 = 0;
pub const VSCAN_IOCTL_ON: u32 = 1;

//
// VSCAN_IOCTL_SET_SPEED values
//
pub const VSCAN_SPEED_20K: u32 = 1;
pub const VSCAN_SPEED_50K: u32 = 2;
pub const VSCAN_SPEED_100K: u32 = 3;
pub const VSCAN_SPEED_125K: u32 = 4;
pub const VSCAN_SPEED_250K: u32 = 5;
pub const VSCAN_SPEED_500K: u32 = 6;
pub const VSCAN_SPEED_800K: u32 = 7;
pub const VSCAN_SPEED_1M: u32 = 8;

//
// Per-message flags (VSCAN_MSG.Flags)
//
pub const VSCAN_FLAGS_STANDARD: u8 = 1 << 0;
pub const VSCAN_FLAGS_EXTENDED: u8 = 1 << 1;
pub const VSCAN_FLAGS_REMOTE: u8 = 1 << 2;
pub const VSCAN_FLAGS_TIMESTAMP: u8 = 1 << 3;

//
// VSCAN_IOCTL_GET_FLAGS bits
//
pub const VSCAN_IOCTL_FLAG_RX_FIFO_FULL: u32 = 1 << 0;
pub const VSCAN_IOCTL_FLAG_TX_FIFO_FULL: u32 = 1 << 1;
pub const VSCAN_IOCTL_FLAG_ERR_WARNING: u32 = 1 << 2;
pub const VSCAN_IOCTL_FLAG_DATA_OVERRUN: u32 = 1 << 3;
pub const VSCAN_IOCTL_FLAG_UNUSED: u32 = 1 << 4;
pub const VSCAN_IOCTL_FLAG_ERR_PASSIVE: u32 = 1 << 5;
pub const VSCAN_IOCTL_FLAG_ARBIT_LOST: u32 = 1 << 6;
pub const VSCAN_IOCTL_FLAG_BUS_ERROR: u32 = 1 << 7;

//
// Identifier ranges
//
pub const CAN_SFF_MASK: u32 = 0x0000_07FF; // standard id (11-bit)
pub const CAN_EFF_MASK: u32 = 0x1FFF_FFFF; // extended id (29-bit)
pub const CAN_MAX_DLEN: usize = 8;
