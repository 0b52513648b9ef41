//! Adapters: concrete implementations of the port and transport traits.
//!
//! | Adapter            | Implements   | Connects to                     |
//! |--------------------|--------------|---------------------------------|
//! | `ble_transport`    | Transport    | Bluedroid GATT server (NUS)     |
//! | `serial_transport` | Transport    | UART0 console / in-memory port  |
//! | `storage`          | FileStore    | SPIFFS partition / directory    |
//! | `system`           | SystemPort   | ESP32 heap, timer, reset        |
//! | `pins`             | PinPort      | ESP32 GPIO (allow-listed)       |
//! | `lua`              | Interpreter  | Embedded Lua 5.4                |

pub mod ble_transport;
pub mod lua;
pub mod pins;
pub mod serial_transport;
pub mod storage;
pub mod system;
