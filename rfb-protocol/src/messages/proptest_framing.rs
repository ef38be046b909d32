//! Fuzzes message parsing against a reader that splits the stream at an
//! arbitrary byte boundary, since a real TCP socket can hand back a message
//! in however many pieces it likes.
