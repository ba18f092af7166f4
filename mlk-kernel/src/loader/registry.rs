//! Embedded binary registry
//!
//! The set of programs `SPAWN` can start is closed at build time: a table
//! of MLK images compiled into the kernel. The ids are part of this
//! build's ABI.
//!
//! The two images below are hand-assembled flat AArch64 code, kept tiny on
//! purpose: `init` spawns `hello`, waits for it and exits; `hello` prints
//! a greeting and exits. Together they exercise spawn, wait, console
//! output and exit over the raw syscall ABI.

/// Binary id of the init program.
pub const BIN_INIT: u32 = 0;

/// Binary id of the hello program.
pub const BIN_HELLO: u32 = 1;

/// `init`: spawn hello at normal priority, wait for any child, exit 0.
///
/// ```text
/// mov  x0, #1        // binary id: hello
/// mov  x1, #2        // priority: normal
/// mov  x8, #4        // SPAWN
/// svc  #0
/// movn x0, #0        // wait target: any child (-1)
/// mov  x8, #5        // WAIT
/// svc  #0
/// mov  x0, #0
/// mov  x8, #0        // EXIT
/// svc  #0
/// b    .
/// ```
static INIT_IMAGE: [u8; 60] = [
    // header: magic, entry 0, code_size 44, reserved 0
    0x4D, 0x4C, 0x4B, 0x01,
    0x00, 0x00, 0x00, 0x00,
    0x2C, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00,
    // code
    0x20, 0x00, 0x80, 0xD2, // mov x0, #1
    0x41, 0x00, 0x80, 0xD2, // mov x1, #2
    0x88, 0x00, 0x80, 0xD2, // mov x8, #4
    0x01, 0x00, 0x00, 0xD4, // svc #0
    0x00, 0x00, 0x80, 0x92, // movn x0, #0
    0xA8, 0x00, 0x80, 0xD2, // mov x8, #5
    0x01, 0x00, 0x00, 0xD4, // svc #0
    0x00, 0x00, 0x80, 0xD2, // mov x0, #0
    0x08, 0x00, 0x80, 0xD2, // mov x8, #0
    0x01, 0x00, 0x00, 0xD4, // svc #0
    0x00, 0x00, 0x00, 0x14, // b .
];

/// `hello`: write "Hello World!\n" to the console, exit 0.
///
/// ```text
/// adr  x0, msg       // 32 bytes ahead
/// mov  x1, #14
/// mov  x8, #40       // WRITE
/// svc  #0
/// mov  x0, #0
/// mov  x8, #0        // EXIT
/// svc  #0
/// b    .
/// msg: "Hello World!\n\0" + pad
/// ```
static HELLO_IMAGE: [u8; 64] = [
    // header: magic, entry 0, code_size 48, reserved 0
    0x4D, 0x4C, 0x4B, 0x01,
    0x00, 0x00, 0x00, 0x00,
    0x30, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00,
    // code
    0x00, 0x01, 0x00, 0x10, // adr x0, #32
    0xC1, 0x01, 0x80, 0xD2, // mov x1, #14
    0x08, 0x05, 0x80, 0xD2, // mov x8, #40
    0x01, 0x00, 0x00, 0xD4, // svc #0
    0x00, 0x00, 0x80, 0xD2, // mov x0, #0
    0x08, 0x00, 0x80, 0xD2, // mov x8, #0
    0x01, 0x00, 0x00, 0xD4, // svc #0
    0x00, 0x00, 0x00, 0x14, // b .
    // msg
    b'H', b'e', b'l', b'l', b'o', b' ', b'W', b'o',
    b'r', b'l', b'd', b'!', b'\n', 0x00, 0x00, 0x00,
];

/// The registry table: (id, name, image).
static IMAGES: &[(u32, &str, &[u8])] = &[
    (BIN_INIT, "init", &INIT_IMAGE),
    (BIN_HELLO, "hello", &HELLO_IMAGE),
];

/// Look up an embedded image by binary id.
#[must_use]
pub fn image(id: u32) -> Option<&'static [u8]> {
    IMAGES
        .iter()
        .find(|(bin_id, _, _)| *bin_id == id)
        .map(|(_, _, data)| *data)
}

/// Name of a binary id, for logging.
#[must_use]
pub fn name(id: u32) -> &'static str {
    IMAGES
        .iter()
        .find(|(bin_id, _, _)| *bin_id == id)
        .map_or("?", |(_, name, _)| name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlk_abi::image;

    #[test]
    fn test_all_embedded_images_parse() {
        for (id, name, data) in IMAGES {
            let parsed = image::parse(data);
            assert!(parsed.is_ok(), "image {} ({}) rejected", id, name);
            let (header, code) = parsed.unwrap();
            assert!((header.entry_offset as usize) < code.len());
        }
    }

    #[test]
    fn test_lookup() {
        assert!(super::image(BIN_INIT).is_some());
        assert!(super::image(BIN_HELLO).is_some());
        assert!(super::image(999).is_none());
        assert_eq!(name(BIN_HELLO), "hello");
    }

    #[test]
    fn test_hello_message_bytes() {
        // The WRITE syscall in hello points 32 bytes past the adr
        // instruction with length 14.
        let (_, code) = image::parse(&HELLO_IMAGE).unwrap();
        assert_eq!(&code[32..46], b"Hello World!\n\0");
    }
}
