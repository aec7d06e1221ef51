mod frame_codec;
mod router_laws;
