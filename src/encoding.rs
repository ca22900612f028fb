use crate::consts::{LENGTH_U16, LENGTH_U64};

pub fn encode_length(length: usize) -> Vec<u8> {
    if length <= 125 {
        // the first byte is the length
        vec![length as u8]
    } else if length <= 65535 {
        // the first byte is 126, read the next 2 bytes as u16 for a length
        [&[LENGTH_U16][..], &(length as u16).to_be_bytes()].concat()
    } else {
        // the first byte is 127, read the next 8 bytes as u64 for a length
        [&[LENGTH_U64][..], &(length as u64).to_be_bytes()].concat()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_length() {
        assert_eq!(encode_length(0), vec![0]);
        assert_eq!(encode_length(125), vec![125]);
    }

    #[test]
    fn sixteen_bit_length() {
        assert_eq!(encode_length(126), vec![126, 0, 126]);
        assert_eq!(encode_length(65535), vec![126, 0xFF, 0xFF]);
    }

    #[test]
    fn sixty_four_bit_length() {
        assert_eq!(encode_length(65536), vec![127, 0, 0, 0, 0, 0, 1, 0, 0]);
    }
}
