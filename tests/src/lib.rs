//! End-to-end sessions: the serial link, the event loop and the simulated
//! board wired together the way the console wires them.

#[cfg(test)]
mod session;
