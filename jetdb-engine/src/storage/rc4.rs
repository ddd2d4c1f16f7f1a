//! RC4 keystream used to de-obfuscate the header and keyed pages
//!
//! RC4 is symmetric, so the same call both encrypts and decrypts.

/// RC4 cipher state after key scheduling
pub struct Rc4 {
    state: [u8; 256],
    i: u8,
    j: u8,
}

impl Rc4 {
    /// Run the key-scheduling algorithm
    pub fn new(key: &[u8]) -> Self {
        let mut state = [0u8; 256];
        for (i, slot) in state.iter_mut().enumerate() {
            *slot = i as u8;
        }

        if !key.is_empty() {
            let mut j: u8 = 0;
            for i in 0..256 {
                j = j
                    .wrapping_add(state[i])
                    .wrapping_add(key[i % key.len()]);
                state.swap(i, j as usize);
            }
        }

        Rc4 { state, i: 0, j: 0 }
    }

    /// XOR the keystream into `data`
    pub fn apply_keystream(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            self.i = self.i.wrapping_add(1);
            self.j = self.j.wrapping_add(self.state[self.i as usize]);
            self.state.swap(self.i as usize, self.j as usize);
            let k = self.state[self.state[self.i as usize]
                .wrapping_add(self.state[self.j as usize]) as usize];
            *byte ^= k;
        }
    }
}

/// Apply RC4 with `key` to a copy of `data`
pub fn apply(data: &[u8], key: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    apply_in_place(&mut out, key);
    out
}

/// Apply RC4 with `key` to `data` in place
pub fn apply_in_place(data: &mut [u8], key: &[u8]) {
    Rc4::new(key).apply_keystream(data);
}

/// Key for a keyed page: the database key XOR the little-endian page number
pub fn page_key(db_key: u32, page_number: u32) -> [u8; 4] {
    (db_key ^ page_number).to_le_bytes()
}
