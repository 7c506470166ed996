//! Engine tests against a scripted daemon on a loopback socket.

mod support;
