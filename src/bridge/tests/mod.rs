//! Bridge module tests
