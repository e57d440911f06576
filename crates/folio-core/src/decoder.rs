//! Audio decoding via Symphonia
//!
//! Opens one audio file and yields interleaved f32 packets from its first
//! audio track.

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{ Decoder as SymphoniaDecoder, DecoderOptions, CODEC_TYPE_NULL };
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{ FormatOptions, FormatReader, SeekMode, SeekTo };
use symphonia::core::io::{ MediaSourceStream, MediaSourceStreamOptions };
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;
use thiserror::Error;

use crate::engine::EngineError;


/// Errors that can occur during decoding.
#[derive( Debug, Error )]
pub enum DecoderError {
    #[error( "Failed to open file: {0}" )]
    FileOpen( #[from] std::io::Error ),

    #[error( "Unsupported format" )]
    UnsupportedFormat,

    #[error( "No audio tracks found" )]
    NoAudioTrack,

    #[error( "Decoder creation failed: {0}" )]
    DecoderCreation( String ),

    #[error( "Decode error: {0}" )]
    Decode( String ),

    #[error( "Seek error: {0}" )]
    Seek( String ),
}


impl From<DecoderError> for EngineError {
    fn from( e: DecoderError ) -> Self {
        match e {
            DecoderError::FileOpen( io ) => EngineError::FileOpen( io.to_string() ),
            other => EngineError::Decode( other.to_string() ),
        }
    }
}


/// Decoder for one audio file.
pub struct Decoder {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn SymphoniaDecoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
    duration: Option<Duration>,
    sample_buf: Option<SampleBuffer<f32>>,
}


impl Decoder {
    /// Opens and probes `path`.
    pub fn open( path: &Path ) -> Result<Self, DecoderError> {
        let file = File::open( path )?;
        let mss = MediaSourceStream::new( Box::new( file ), MediaSourceStreamOptions { buffer_len: 64 * 1024 } );

        let mut hint = Hint::new();
        if let Some( ext ) = path.extension().and_then( |e| e.to_str() ) {
            hint.with_extension( ext );
        }

        let probed = symphonia::default::get_probe()
            .format( &hint, mss, &FormatOptions::default(), &MetadataOptions::default() )
            .map_err( |_| DecoderError::UnsupportedFormat )?;
        let format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find( |t| t.codec_params.codec != CODEC_TYPE_NULL )
            .ok_or( DecoderError::NoAudioTrack )?;

        let track_id = track.id;
        let params = &track.codec_params;
        let sample_rate = params.sample_rate.unwrap_or( 44100 );
        let channels = params.channels.map( |c| c.count() ).unwrap_or( 2 );
        let duration = params.n_frames
            .map( |frames| Duration::from_secs_f64( frames as f64 / sample_rate as f64 ) );

        let decoder = symphonia::default::get_codecs()
            .make( params, &DecoderOptions::default() )
            .map_err( |e| DecoderError::DecoderCreation( e.to_string() ) )?;

        tracing::debug!(
            "Opened {:?}: {} Hz, {} channels, duration {:?}",
            path,
            sample_rate,
            channels,
            duration
        );

        Ok( Self {
            format_reader,
            decoder,
            track_id,
            sample_rate,
            channels,
            duration,
            sample_buf: None,
        })
    }


    pub fn sample_rate( &self ) -> u32 {
        self.sample_rate
    }


    pub fn channels( &self ) -> usize {
        self.channels
    }


    /// Total length, when the container declares it.
    pub fn duration( &self ) -> Option<Duration> {
        self.duration
    }


    /// Decodes the next packet into interleaved samples.
    ///
    /// Returns `None` at end of file. Corrupt packets are skipped.
    pub fn decode_next( &mut self ) -> Result<Option<Vec<f32>>, DecoderError> {
        loop {
            let packet = match self.format_reader.next_packet() {
                Ok( packet ) => packet,
                Err( SymphoniaError::IoError( ref e ) ) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok( None );
                }
                Err( e ) => return Err( DecoderError::Decode( e.to_string() ) ),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode( &packet ) {
                Ok( decoded ) => decoded,
                Err( SymphoniaError::DecodeError( e ) ) => {
                    tracing::debug!( "Skipping corrupt packet: {}", e );
                    continue;
                }
                Err( e ) => return Err( DecoderError::Decode( e.to_string() ) ),
            };

            let frames = decoded.frames();
            let spec = *decoded.spec();
            if self.sample_buf.as_ref().is_some_and( |b| b.capacity() < frames ) {
                self.sample_buf = None;
            }
            let buffer = self.sample_buf.get_or_insert_with( || SampleBuffer::new( frames as u64, spec ) );
            buffer.copy_interleaved_ref( decoded );

            return Ok( Some( buffer.samples().to_vec() ) );
        }
    }


    /// Seeks to `fraction` of the duration and returns the new position.
    pub fn seek_fraction( &mut self, fraction: f64 ) -> Result<Duration, DecoderError> {
        let duration = self.duration
            .ok_or_else( || DecoderError::Seek( "duration unknown".into() ) )?;
        let target = duration.mul_f64( fraction.clamp( 0.0, 1.0 ) );

        let seek_to = SeekTo::Time {
            time: Time::from( target.as_secs_f64() ),
            track_id: Some( self.track_id ),
        };
        self.format_reader
            .seek( SeekMode::Accurate, seek_to )
            .map_err( |e| DecoderError::Seek( e.to_string() ) )?;
        self.decoder.reset();

        Ok( target )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_open_missing_file_is_file_error() {
        let result = Decoder::open( Path::new( "/nonexistent/folio/track.flac" ) );
        let error = EngineError::from( result.err().unwrap() );
        assert!( matches!( error, EngineError::FileOpen( _ ) ) );
    }


    #[test]
    fn test_open_garbage_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "noise.mp3" );
        std::fs::write( &path, b"definitely not audio" ).unwrap();

        let result = Decoder::open( &path );
        assert!( matches!( result, Err( DecoderError::UnsupportedFormat ) ) );
    }
}
