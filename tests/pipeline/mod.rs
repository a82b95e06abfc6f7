mod background;
mod decode;
mod load;
mod patching;
