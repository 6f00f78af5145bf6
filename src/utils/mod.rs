pub mod time;

/// A fresh random identifier, used for run ids and ids minted by the in-memory store.
pub fn longid() -> String {
    nanoid::nanoid!()
}

/// Short identifier in the 18 character alphanumeric shape most record stores mint.
pub fn shortid() -> String {
    const ALPHABET: [char; 36] = [
        '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r',
        's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
    ];
    nanoid::nanoid!(18, &ALPHABET)
}
