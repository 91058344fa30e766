//Drive: steering/throttle session over a duplex link
//The vehicle model stands in for the external simulator; the link stands in
//for its transport. Session logic is the same either way.
pub mod link;
pub mod session;
pub mod vehicle;
