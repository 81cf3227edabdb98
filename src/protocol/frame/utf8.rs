// Lossy UTF-8 decoding, modified from the string collector in https://github.com/SimonSapin/rust-utf8/blob/218fea2b57b0e4c3de9fa17a376fcc4a4c0d08f3/src/lossy.rs

/// Decodes `input` as UTF-8, dropping invalid sequences instead of replacing them.
///
/// A truncated sequence at the end of the input is dropped as well.
pub fn decode_lossy(mut input: &[u8]) -> String {
    let mut data = String::with_capacity(input.len());

    loop {
        match simdutf8::compat::from_utf8(input) {
            Ok(text) => {
                data.push_str(text);
                return data;
            }

            Err(error) => {
                let (valid, after_valid) = input.split_at(error.valid_up_to());
                // SAFETY: `valid_up_to` marks the end of a valid prefix.
                data.push_str(unsafe { std::str::from_utf8_unchecked(valid) });

                match error.error_len() {
                    Some(invalid_sequence_length) => {
                        input = &after_valid[invalid_sequence_length..];
                    }

                    None => return data,
                }
            }
        }
    }
}
